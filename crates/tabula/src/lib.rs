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

//! Tabula turns a free-text task and a tabular dataset into executed code.
//!
//! An external code-generation oracle proposes source code, the sanitizer
//! recovers a well-formed candidate from the raw response, the router picks
//! an execution runtime, the adapter runs the code against the dataset, and
//! the retry controller feeds failures back to the oracle as correction
//! requests, bounded by an attempt budget.

pub mod dataset;
pub mod llm;
pub mod retry;
pub mod router;
pub mod run_log;
pub mod runtime;
pub mod types;

pub use dataset::loader::LoadError;
pub use dataset::DataFrame;
pub use llm::sanitize::ParseError;
pub use llm::{CodeOracle, CorrectionContext, HttpOracle, OracleError};
pub use retry::{AttemptRecord, Engine, EngineError, RetrySession, RetryState, TaskOutcome};
pub use router::{LexicalClassifier, Router, RoutingError, RuntimeKind};
pub use run_log::{FsRunLogger, LogError, NullRunLogger, RunLogger};
pub use runtime::{ExecContext, ExecutionResult, ExecutionStatus, RuntimeAdapter};
pub use types::{CodeCandidate, Task};
