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

//! Per-attempt audit trail.
//!
//! Every executed attempt is recorded as a timestamped trio: the code that
//! ran, the runtime's output message, and the resulting dataset as CSV when
//! one was produced. Logging is advisory: the engine warns on a logging
//! fault and carries on.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use crate::dataset::{render_cell, DataFrame};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("could not write run log under {dir}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not serialise result frame: {0}")]
    Csv(#[from] csv::Error),
}

pub trait RunLogger: Send + Sync {
    fn record(
        &self,
        code: &str,
        output: &str,
        result: Option<&DataFrame>,
    ) -> Result<(), LogError>;
}

/// Filesystem logger writing `{stamp}_code.txt`, `{stamp}_output.txt` and,
/// when a result frame exists, `{stamp}_result.csv`.
pub struct FsRunLogger {
    dir: PathBuf,
}

impl FsRunLogger {
    pub const DEFAULT_DIR: &'static str = "execution_logs";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), LogError> {
        fs::write(path, contents).map_err(|source| LogError::Io {
            dir: self.dir.clone(),
            source,
        })
    }
}

impl Default for FsRunLogger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIR)
    }
}

impl RunLogger for FsRunLogger {
    fn record(
        &self,
        code: &str,
        output: &str,
        result: Option<&DataFrame>,
    ) -> Result<(), LogError> {
        fs::create_dir_all(&self.dir).map_err(|source| LogError::Io {
            dir: self.dir.clone(),
            source,
        })?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%f");
        self.write(&self.dir.join(format!("{stamp}_code.txt")), code)?;
        self.write(&self.dir.join(format!("{stamp}_output.txt")), output)?;
        if let Some(frame) = result {
            let mut writer = csv::Writer::from_path(self.dir.join(format!("{stamp}_result.csv")))
                .map_err(LogError::Csv)?;
            writer.write_record(frame.columns())?;
            for row in frame.rows() {
                writer.write_record(row.iter().map(render_cell))?;
            }
            writer.flush().map_err(|source| LogError::Io {
                dir: self.dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Discards everything. Useful for library callers that keep their own
/// records.
#[derive(Debug, Default)]
pub struct NullRunLogger;

impl RunLogger for NullRunLogger {
    fn record(&self, _: &str, _: &str, _: Option<&DataFrame>) -> Result<(), LogError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_code_output_and_csv_trio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = FsRunLogger::new(dir.path());
        let frame = DataFrame::new(
            vec!["a".into(), "b".into()],
            vec![vec![json!(1), json!("x")]],
        );
        logger
            .record("SELECT a FROM t;", "ok", Some(&frame))
            .expect("record");

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3);
        assert!(names[0].ends_with("_code.txt"));
        assert!(names[1].ends_with("_output.txt"));
        assert!(names[2].ends_with("_result.csv"));

        let csv_text = fs::read_to_string(dir.path().join(&names[2])).expect("csv");
        assert!(csv_text.starts_with("a,b"));
        assert!(csv_text.contains("1,x"));
    }

    #[test]
    fn skips_csv_when_no_result_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = FsRunLogger::new(dir.path());
        logger.record("2 + 2", "4", None).expect("record");
        let count = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(count, 2);
    }
}
