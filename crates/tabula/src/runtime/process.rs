// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! External-toolchain adapters.
//!
//! Code is serialised to a temporary file whose name embeds the task id,
//! then handed to the toolchain as a subprocess. These adapters are
//! execute-only: they never ingest a result frame, so the dataset in scope
//! is unchanged. The subprocess is awaited to completion without blocking
//! the executor; no mid-flight timeout is imposed here.

use std::io::Write;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecContext, ExecutionResult, RuntimeAdapter};
use crate::dataset::DataFrame;

/// How the written source file is handed to the toolchain binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileArg {
    /// Full path of the temp file as the final argument (Rscript, julia).
    Path,
    /// File stem only (MATLAB's `-batch` takes a script name, not a path).
    Stem,
}

/// One external execution environment.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub name: &'static str,
    pub extension: &'static str,
    pub program: &'static str,
    pub args: &'static [&'static str],
    pub file_arg: FileArg,
}

pub const R: Toolchain = Toolchain {
    name: "r",
    extension: "R",
    program: "Rscript",
    args: &[],
    file_arg: FileArg::Path,
};

pub const JULIA: Toolchain = Toolchain {
    name: "julia",
    extension: "jl",
    program: "julia",
    args: &[],
    file_arg: FileArg::Path,
};

pub const MATLAB: Toolchain = Toolchain {
    name: "matlab",
    extension: "m",
    program: "matlab",
    args: &["-batch"],
    file_arg: FileArg::Stem,
};

#[derive(Debug)]
pub struct ToolchainAdapter {
    toolchain: Toolchain,
}

impl ToolchainAdapter {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

#[async_trait]
impl RuntimeAdapter for ToolchainAdapter {
    fn name(&self) -> &str {
        self.toolchain.name
    }

    async fn execute(
        &self,
        code: &str,
        _dataset: &DataFrame,
        ctx: &ExecContext,
    ) -> ExecutionResult {
        let file = match tempfile::Builder::new()
            .prefix(&format!("tabula_{}_", ctx.task_id.simple()))
            .suffix(&format!(".{}", self.toolchain.extension))
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => {
                return ExecutionResult::failure(format!(
                    "could not create source file for {}: {e}",
                    self.toolchain.name
                ))
            }
        };
        if let Err(e) = file.as_file().write_all(code.as_bytes()) {
            return ExecutionResult::failure(format!(
                "could not write source file for {}: {e}",
                self.toolchain.name
            ));
        }

        let mut command = Command::new(self.toolchain.program);
        command.args(self.toolchain.args);
        match self.toolchain.file_arg {
            FileArg::Path => {
                command.arg(file.path());
            }
            FileArg::Stem => {
                let stem = file
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if let Some(dir) = file.path().parent() {
                    command.current_dir(dir);
                }
                command.arg(stem);
            }
        }

        debug!(toolchain = self.toolchain.name, "invoking external toolchain");
        let output = match command.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(toolchain = self.toolchain.name, "toolchain could not be spawned: {e}");
                return ExecutionResult::failure(format!(
                    "{} could not be invoked: {e}",
                    self.toolchain.program
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ExecutionResult::failure(format!(
                "{} exited with {}: {}",
                self.toolchain.name,
                output.status,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stdout.trim().is_empty() {
            format!("{} script executed successfully", self.toolchain.name)
        } else {
            format!(
                "{} script executed successfully; output:\n{}",
                self.toolchain.name,
                stdout.trim()
            )
        };
        ExecutionResult::success(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionStatus;

    fn shell() -> Toolchain {
        Toolchain {
            name: "shell",
            extension: "sh",
            program: "sh",
            args: &[],
            file_arg: FileArg::Path,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_on_success() {
        let adapter = ToolchainAdapter::new(shell());
        let result = adapter
            .execute("echo hello", &DataFrame::empty(), &ExecContext::default())
            .await;
        assert!(result.is_success());
        assert!(result.message.contains("hello"));
        assert!(result.dataset.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_as_failure() {
        let adapter = ToolchainAdapter::new(shell());
        let result = adapter
            .execute(
                "echo broken >&2; exit 3",
                &DataFrame::empty(),
                &ExecContext::default(),
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.message.contains("broken"));
    }

    #[tokio::test]
    async fn missing_toolchain_binary_is_failure_not_panic() {
        let adapter = ToolchainAdapter::new(Toolchain {
            name: "ghost",
            extension: "gh",
            program: "definitely-not-installed-anywhere",
            args: &[],
            file_arg: FileArg::Path,
        });
        let result = adapter
            .execute("whatever", &DataFrame::empty(), &ExecContext::default())
            .await;
        assert_eq!(result.status, ExecutionStatus::Failure);
    }
}
