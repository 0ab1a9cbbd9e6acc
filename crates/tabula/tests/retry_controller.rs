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

//! End-to-end behaviour of the correction loop against a scripted oracle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tabula::{
    CodeOracle, CorrectionContext, DataFrame, Engine, EngineError, ExecutionStatus, OracleError,
    Task,
};

/// Replays a fixed sequence of raw responses, repeating the last one, and
/// records every correction context it is handed.
struct ScriptedOracle {
    responses: Vec<String>,
    calls: AtomicUsize,
    corrections: Mutex<Vec<Option<String>>>,
}

impl ScriptedOracle {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
            corrections: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeOracle for ScriptedOracle {
    async fn generate(
        &self,
        _task: &Task,
        _dataset_preview: &str,
        correction: Option<&CorrectionContext>,
    ) -> Result<String, OracleError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.corrections
            .lock()
            .expect("corrections lock")
            .push(correction.map(|c| c.error.clone()));
        let index = call.min(self.responses.len() - 1);
        Ok(self.responses[index].clone())
    }
}

fn script_response(code: &str) -> String {
    json!({ "language": "script", "execution": "script", "code": code }).to_string()
}

fn sample() -> DataFrame {
    DataFrame::new(
        vec!["a".into(), "b".into()],
        vec![
            vec![json!(1), json!("x")],
            vec![json!(2), json!("y")],
        ],
    )
}

#[tokio::test]
async fn succeeds_on_first_attempt() {
    let oracle = Arc::new(ScriptedOracle::new(vec![script_response("2 + 2")]));
    let engine = Engine::new(oracle.clone());
    let outcome = engine
        .run(&Task::new("add two and two"), sample())
        .await
        .expect("outcome");
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.message.contains('4'));
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn corrects_failures_then_succeeds_at_k() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        script_response("1 + broken_binding"),
        script_response("also + broken"),
        script_response("40 + 2"),
    ]));
    let engine = Engine::new(oracle.clone());
    let outcome = engine
        .run(&Task::new("compute"), sample())
        .await
        .expect("outcome");
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.message.contains("42"));

    let history = outcome.history;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, ExecutionStatus::Failure);
    assert_eq!(history[1].status, ExecutionStatus::Failure);
    assert_eq!(history[2].status, ExecutionStatus::Success);
    assert_eq!(history[2].attempt, 3);

    // First call carries no correction, every later one carries the
    // previous failure.
    let corrections = oracle.corrections.lock().expect("corrections lock");
    assert_eq!(corrections[0], None);
    assert!(corrections[1].as_deref().unwrap().contains("script error"));
    assert!(corrections[2].is_some());
}

#[tokio::test]
async fn exhausts_after_exactly_max_attempts() {
    let oracle = Arc::new(ScriptedOracle::new(vec![script_response(
        "1 + never_defined",
    )]));
    let engine = Engine::new(oracle.clone()).with_max_attempts(4);
    let err = engine
        .run(&Task::new("doomed"), sample())
        .await
        .expect_err("should exhaust");
    match err {
        EngineError::RetryExhausted { session } => {
            assert_eq!(session.attempts(), 4);
            assert_eq!(session.history().len(), 4);
            assert!(session.last_error().unwrap().contains("script error"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(oracle.calls(), 4);
}

#[tokio::test]
async fn undecodable_response_aborts_without_retry() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        "I am sorry, I cannot help with that.".to_string(),
    ]));
    let engine = Engine::new(oracle.clone());
    let err = engine
        .run(&Task::new("anything"), sample())
        .await
        .expect_err("should abort");
    assert!(matches!(err, EngineError::Parse(_)));
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn unsupported_declared_runtime_aborts_without_retry() {
    let oracle = Arc::new(ScriptedOracle::new(vec![json!({
        "language": "cobol",
        "execution": "cobol",
        "code": "DISPLAY 'HELLO'."
    })
    .to_string()]));
    let engine = Engine::new(oracle.clone());
    let err = engine
        .run(&Task::new("legacy"), sample())
        .await
        .expect_err("should abort");
    assert!(matches!(err, EngineError::Routing(_)));
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn replacement_dataset_carries_into_the_outcome() {
    let oracle = Arc::new(ScriptedOracle::new(vec![script_response(
        "result_table = ((10, \"p\"), (20, \"q\")); \"reshaped\"",
    )]));
    let engine = Engine::new(oracle);
    let outcome = engine
        .run(&Task::new("reshape"), sample())
        .await
        .expect("outcome");
    assert_eq!(outcome.dataset.row_count(), 2);
    assert_eq!(outcome.dataset.rows()[1][0], json!(20));
    assert_eq!(outcome.dataset.columns(), ["a", "b"]);
}

#[tokio::test]
async fn sql_candidate_routes_to_the_relational_adapter() {
    let oracle = Arc::new(ScriptedOracle::new(vec![json!({
        "language": "sql",
        "execution": "sql",
        "code": "SELECT a FROM t;"
    })
    .to_string()]));
    let engine = Engine::new(oracle);
    let outcome = engine
        .run(&Task::new("project column a"), sample())
        .await
        .expect("outcome");
    assert_eq!(outcome.dataset.columns(), ["a"]);
    assert_eq!(outcome.dataset.row_count(), 2);
}
