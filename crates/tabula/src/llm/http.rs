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

use async_trait::async_trait;
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{CodeOracle, CorrectionContext, OracleError};
use crate::types::Task;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| Client::builder().build().expect("HTTP client"));

const SYSTEM_PROMPT: &str = r#"You are an agentic code execution assistant. The user gives you a dataset preview and a task.
Choose the execution target that fits the task and return a single JSON object with keys 'language', 'execution' and 'code'.
Execution targets:
- "script": a restricted arithmetic/boolean expression script. The dataset is bound to the variable 'table' (a tuple of row tuples) with column names in 'columns'. Assign a tuple of row tuples to 'result_table' to return a new dataset.
- "sql": SQLite SQL against a table named 't' whose columns match the preview. The last statement produces the result.
- "r", "julia", "matlab": a standalone script for that toolchain.
- "session": statements submitted to an already-connected analytics session.
Respond only with JSON, for example:
{"language": "sql", "execution": "sql", "code": "SELECT * FROM t;"}"#;

/// Chat-completions client for an OpenAI-compatible generation endpoint.
/// Configuration comes from the environment; the defaults target Groq, the
/// provider the system was originally built against.
#[derive(Clone, Debug)]
pub struct HttpOracle {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl HttpOracle {
    pub fn from_env() -> Result<Self, OracleError> {
        dotenv().ok();
        let api_key = std::env::var("TABULA_API_KEY")
            .or_else(|_| std::env::var("GROQ_API_KEY"))
            .map_err(|_| {
                OracleError::Config("TABULA_API_KEY or GROQ_API_KEY must be set".to_string())
            })?;
        Ok(Self {
            endpoint: std::env::var("TABULA_ENDPOINT").unwrap_or_else(|_| {
                "https://api.groq.com/openai/v1/chat/completions".to_string()
            }),
            api_key,
            model: std::env::var("TABULA_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            max_tokens: std::env::var("TABULA_MAX_TOKENS")
                .unwrap_or_else(|_| "4096".to_string())
                .parse()
                .unwrap_or(4096),
            temperature: std::env::var("TABULA_TEMPERATURE")
                .unwrap_or_else(|_| "0.2".to_string())
                .parse()
                .unwrap_or(0.2),
        })
    }

    fn user_message(
        task: &Task,
        dataset_preview: &str,
        correction: Option<&CorrectionContext>,
    ) -> String {
        let mut msg = String::new();
        if let Some(ctx) = correction {
            msg.push_str(&format!(
                "The previous attempt failed. Fix the code.\nError:\n{}\n\nFailing code:\n{}\n\n",
                ctx.error, ctx.failing_code
            ));
        }
        msg.push_str(&format!("Task:\n{}\n\n", task.text()));
        if let Some(hint) = task.language_hint() {
            msg.push_str(&format!("Preferred language: {hint}\n\n"));
        }
        msg.push_str(&format!(
            "Data preview:\n{dataset_preview}\n\nRespond only in JSON."
        ));
        msg
    }
}

#[async_trait]
impl CodeOracle for HttpOracle {
    async fn generate(
        &self,
        task: &Task,
        dataset_preview: &str,
        correction: Option<&CorrectionContext>,
    ) -> Result<String, OracleError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_message(task, dataset_preview, correction)},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        debug!(model = %self.model, correction = correction.is_some(), "requesting candidate from oracle");
        let response = HTTP_CLIENT
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or(OracleError::EmptyCompletion)
    }
}
