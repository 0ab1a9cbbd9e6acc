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

pub mod process;
pub mod script;
pub mod session;
pub mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::DataFrame;
use session::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// Outcome of one adapter invocation. A replacement dataset is returned
/// wholesale or not at all; the caller decides whether to swap it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub message: String,
    pub dataset: Option<DataFrame>,
}

impl ExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            message: message.into(),
            dataset: None,
        }
    }

    pub fn success_with(message: impl Into<String>, dataset: DataFrame) -> Self {
        Self {
            status: ExecutionStatus::Success,
            message: message.into(),
            dataset: Some(dataset),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            message: message.into(),
            dataset: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Per-task execution context. The task id keys temporary artefact names so
/// concurrent tasks would not collide; the session registry is the explicit
/// handle replacing the original design's ambient session map.
#[derive(Clone)]
pub struct ExecContext {
    pub task_id: Uuid,
    pub sessions: Arc<SessionRegistry>,
}

impl ExecContext {
    pub fn new(task_id: Uuid, sessions: Arc<SessionRegistry>) -> Self {
        Self { task_id, sessions }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            task_id: Uuid::new_v4(),
            sessions: Arc::new(SessionRegistry::default()),
        }
    }
}

/// The uniform runtime contract. Adding a runtime means one implementation
/// of this trait plus a routing row; router and retry controller are
/// untouched. Execution-time faults are reported as
/// `ExecutionStatus::Failure`, never as a panic or an `Err` escaping the
/// adapter.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        code: &str,
        dataset: &DataFrame,
        ctx: &ExecContext,
    ) -> ExecutionResult;
}
