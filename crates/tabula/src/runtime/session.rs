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

//! Session-backed execution.
//!
//! Some analytics environments hold server-side state between submissions,
//! so their code cannot go through a one-shot subprocess. Sessions are held
//! in an explicit registry owned by the engine and threaded through
//! `ExecContext`; there is no ambient global map. The registry starts
//! empty, and routing to a session runtime with no registered session is a
//! reported failure, not a panic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use super::{ExecContext, ExecutionResult, RuntimeAdapter};
use crate::dataset::DataFrame;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session transport failed: {0}")]
    Transport(String),
    #[error("session rejected submission: {0}")]
    Rejected(String),
}

/// A live connection to a stateful analytics environment.
#[async_trait]
pub trait AnalyticsSession: Send + Sync {
    /// Submits a code fragment and returns the environment's log output.
    async fn submit(&self, code: &str) -> Result<String, SessionError>;
}

/// Explicit home for live sessions, keyed by session name.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn AnalyticsSession>>>,
}

impl SessionRegistry {
    pub fn register(&self, key: impl Into<String>, session: Arc<dyn AnalyticsSession>) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(key.into(), session);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn AnalyticsSession>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn AnalyticsSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(key)
    }
}

/// Routes code into a named session from the registry.
pub struct SessionAdapter {
    key: String,
}

impl SessionAdapter {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl RuntimeAdapter for SessionAdapter {
    fn name(&self) -> &str {
        "session"
    }

    async fn execute(
        &self,
        code: &str,
        _dataset: &DataFrame,
        ctx: &ExecContext,
    ) -> ExecutionResult {
        let Some(session) = ctx.sessions.get(&self.key) else {
            warn!(key = %self.key, "no active session registered");
            return ExecutionResult::failure(format!(
                "no active session '{}'; establish a session before routing code to it",
                self.key
            ));
        };
        match session.submit(code).await {
            Ok(log) => ExecutionResult::success(format!(
                "session code executed successfully; log:\n{}",
                log.trim()
            )),
            Err(e) => ExecutionResult::failure(format!("session execution failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionStatus;

    struct EchoSession;

    #[async_trait]
    impl AnalyticsSession for EchoSession {
        async fn submit(&self, code: &str) -> Result<String, SessionError> {
            Ok(format!("ran: {code}"))
        }
    }

    struct BrokenSession;

    #[async_trait]
    impl AnalyticsSession for BrokenSession {
        async fn submit(&self, _code: &str) -> Result<String, SessionError> {
            Err(SessionError::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn missing_session_is_a_reported_failure() {
        let adapter = SessionAdapter::new("sas");
        let result = adapter
            .execute("proc print; run;", &DataFrame::empty(), &ExecContext::default())
            .await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.message.contains("no active session"));
    }

    #[tokio::test]
    async fn registered_session_receives_the_code() {
        let ctx = ExecContext::default();
        ctx.sessions.register("sas", Arc::new(EchoSession));
        let adapter = SessionAdapter::new("sas");
        let result = adapter
            .execute("proc print; run;", &DataFrame::empty(), &ctx)
            .await;
        assert!(result.is_success());
        assert!(result.message.contains("ran: proc print; run;"));
    }

    #[tokio::test]
    async fn session_fault_is_a_failure() {
        let ctx = ExecContext::default();
        ctx.sessions.register("sas", Arc::new(BrokenSession));
        let adapter = SessionAdapter::new("sas");
        let result = adapter
            .execute("data x; run;", &DataFrame::empty(), &ctx)
            .await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.message.contains("connection reset"));
    }
}
