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

pub mod http;
pub mod sanitize;

pub use http::HttpOracle;

use async_trait::async_trait;

use crate::types::Task;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle response missing completion content")]
    EmptyCompletion,
    #[error("oracle configuration error: {0}")]
    Config(String),
}

/// Context for a correction round: the code that just failed and the
/// failure message it produced, embedded verbatim in the next prompt.
#[derive(Debug, Clone)]
pub struct CorrectionContext {
    pub failing_code: String,
    pub error: String,
}

/// The external generation oracle. Implementations return the raw response
/// text; decoding into a [`crate::types::CodeCandidate`] is the sanitizer's
/// job so every implementation benefits from the same repair passes.
#[async_trait]
pub trait CodeOracle: Send + Sync {
    async fn generate(
        &self,
        task: &Task,
        dataset_preview: &str,
        correction: Option<&CorrectionContext>,
    ) -> Result<String, OracleError>;
}
