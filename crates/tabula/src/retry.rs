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

//! Bounded correction loop.
//!
//! One `Engine::run` call drives generate, sanitize, route, execute for a
//! single task. An execution failure is folded into a correction request
//! carrying the failing code and its error, and the oracle is asked again;
//! the loop ends at the first adapter success or after exactly
//! `max_attempts` attempts. Oracle transport faults, undecodable
//! responses, and unsupported runtime declarations abort immediately:
//! retrying cannot fix any of them.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dataset::DataFrame;
use crate::llm::sanitize::{self, ParseError};
use crate::llm::{CodeOracle, CorrectionContext, OracleError};
use crate::router::{Router, RoutingError, RuntimeKind};
use crate::run_log::{NullRunLogger, RunLogger};
use crate::runtime::process::{ToolchainAdapter, JULIA, MATLAB, R};
use crate::runtime::script::ScriptAdapter;
use crate::runtime::session::{SessionAdapter, SessionRegistry};
use crate::runtime::sql::SqlAdapter;
use crate::runtime::{ExecContext, ExecutionStatus, RuntimeAdapter};
use crate::types::{CodeCandidate, Task};

/// Default bound on generation attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: usize = 4;

/// Registry key the session adapter resolves by default.
pub const DEFAULT_SESSION_KEY: &str = "sas";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("no runtime adapter registered for {0:?}")]
    MissingAdapter(RuntimeKind),
    #[error("all {} attempts failed; last error: {}", .session.attempts(), .session.last_error().unwrap_or("none"))]
    RetryExhausted { session: Box<RetrySession> },
}

/// Where the loop stands after the most recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    CorrectionRequested,
    Success,
    Exhausted,
}

/// One generate-and-execute attempt, kept verbatim for reporting.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub candidate: CodeCandidate,
    pub runtime: RuntimeKind,
    pub status: ExecutionStatus,
    pub message: String,
}

/// Mutable state of one task's correction loop.
#[derive(Debug)]
pub struct RetrySession {
    task_id: Uuid,
    max_attempts: usize,
    state: RetryState,
    history: Vec<AttemptRecord>,
}

impl RetrySession {
    fn new(task_id: Uuid, max_attempts: usize) -> Self {
        Self {
            task_id,
            max_attempts,
            state: RetryState::Attempting,
            history: Vec::new(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn attempts(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    pub fn last_error(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|r| r.status == ExecutionStatus::Failure)
            .map(|r| r.message.as_str())
    }

    fn record(&mut self, record: AttemptRecord) {
        self.history.push(record);
    }
}

/// Final envelope handed back to the caller on success.
#[derive(Debug)]
pub struct TaskOutcome {
    pub dataset: DataFrame,
    pub message: String,
    pub attempts: usize,
    pub history: Vec<AttemptRecord>,
}

pub struct Engine {
    oracle: Arc<dyn CodeOracle>,
    router: Router,
    adapters: HashMap<RuntimeKind, Arc<dyn RuntimeAdapter>>,
    run_logger: Arc<dyn RunLogger>,
    sessions: Arc<SessionRegistry>,
    max_attempts: usize,
}

impl Engine {
    /// Engine with the full standard adapter set and no persistent run log.
    pub fn new(oracle: Arc<dyn CodeOracle>) -> Self {
        let mut adapters: HashMap<RuntimeKind, Arc<dyn RuntimeAdapter>> = HashMap::new();
        adapters.insert(RuntimeKind::Script, Arc::new(ScriptAdapter));
        adapters.insert(RuntimeKind::Sql, Arc::new(SqlAdapter));
        adapters.insert(RuntimeKind::R, Arc::new(ToolchainAdapter::new(R)));
        adapters.insert(RuntimeKind::Julia, Arc::new(ToolchainAdapter::new(JULIA)));
        adapters.insert(RuntimeKind::Matlab, Arc::new(ToolchainAdapter::new(MATLAB)));
        adapters.insert(
            RuntimeKind::Session,
            Arc::new(SessionAdapter::new(DEFAULT_SESSION_KEY)),
        );
        Self {
            oracle,
            router: Router::default(),
            adapters,
            run_logger: Arc::new(NullRunLogger),
            sessions: Arc::new(SessionRegistry::default()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_run_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.run_logger = logger;
        self
    }

    pub fn with_adapter(mut self, kind: RuntimeKind, adapter: Arc<dyn RuntimeAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Runs one task to completion against the given dataset.
    ///
    /// A replacement dataset produced by any attempt, including a failed
    /// run's successful side effects, carries forward into subsequent
    /// attempts and into the final outcome.
    pub async fn run(
        &self,
        task: &Task,
        dataset: DataFrame,
    ) -> Result<TaskOutcome, EngineError> {
        let task_id = Uuid::new_v4();
        let ctx = ExecContext::new(task_id, Arc::clone(&self.sessions));
        let mut session = RetrySession::new(task_id, self.max_attempts);
        let mut dataset = dataset;
        let mut correction: Option<CorrectionContext> = None;

        loop {
            session.state = RetryState::Attempting;
            let attempt = session.attempts() + 1;
            debug!(%task_id, attempt, "requesting code from oracle");

            let preview = dataset.preview(5);
            let raw = self
                .oracle
                .generate(task, &preview, correction.as_ref())
                .await?;
            let candidate = sanitize::extract_candidate(&raw)?;
            let kind = self.router.route(&candidate)?;
            let adapter = self
                .adapters
                .get(&kind)
                .ok_or(EngineError::MissingAdapter(kind))?;

            info!(%task_id, attempt, runtime = adapter.name(), "executing candidate");
            let result = adapter.execute(&candidate.code, &dataset, &ctx).await;
            if let Err(e) =
                self.run_logger
                    .record(&candidate.code, &result.message, result.dataset.as_ref())
            {
                warn!(%task_id, "run log write failed: {e}");
            }
            session.record(AttemptRecord {
                attempt,
                candidate: candidate.clone(),
                runtime: kind,
                status: result.status,
                message: result.message.clone(),
            });

            if let Some(frame) = result.dataset {
                dataset = frame;
            }
            if result.status == ExecutionStatus::Success {
                session.state = RetryState::Success;
                info!(%task_id, attempt, "task completed");
                return Ok(TaskOutcome {
                    dataset,
                    message: result.message,
                    attempts: session.attempts(),
                    history: session.history,
                });
            }

            if session.attempts() >= session.max_attempts {
                session.state = RetryState::Exhausted;
                warn!(%task_id, attempts = session.attempts(), "retry budget exhausted");
                return Err(EngineError::RetryExhausted {
                    session: Box::new(session),
                });
            }

            session.state = RetryState::CorrectionRequested;
            debug!(%task_id, attempt, "requesting correction");
            correction = Some(CorrectionContext {
                failing_code: candidate.code,
                error: result.message,
            });
        }
    }
}
