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

//! In-process script adapter.
//!
//! Oracle-produced code is untrusted, so the in-process runtime is a
//! capability-restricted expression evaluator rather than a general
//! interpreter: no filesystem, network, or process access exists in the
//! evaluation context at all. The dataset is seeded under a fixed binding
//! and a replacement is read back from a fixed binding afterwards.

use async_trait::async_trait;
use evalexpr::{
    eval_with_context_mut, Context, ContextWithMutableVariables, DefaultNumericTypes,
    EvalexprError, HashMapContext, Value as ScriptValue,
};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{ExecContext, ExecutionResult, RuntimeAdapter};
use crate::dataset::DataFrame;

/// Binding under which the dataset is seeded: a tuple of row tuples.
pub const TABLE_BINDING: &str = "table";
/// Binding holding the column names, parallel to each row tuple.
pub const COLUMNS_BINDING: &str = "columns";
/// Binding the script assigns a replacement dataset to, if any.
pub const RESULT_BINDING: &str = "result_table";

type NumericTypes = DefaultNumericTypes;

#[derive(Debug, Default)]
pub struct ScriptAdapter;

#[async_trait]
impl RuntimeAdapter for ScriptAdapter {
    fn name(&self) -> &str {
        "script"
    }

    async fn execute(
        &self,
        code: &str,
        dataset: &DataFrame,
        _ctx: &ExecContext,
    ) -> ExecutionResult {
        match run_script(code, dataset) {
            Ok(result) => result,
            Err(e) => ExecutionResult::failure(format!("script error: {e}")),
        }
    }
}

fn run_script(
    code: &str,
    dataset: &DataFrame,
) -> Result<ExecutionResult, EvalexprError<NumericTypes>> {
    let mut context = HashMapContext::<NumericTypes>::new();
    context.set_value(TABLE_BINDING.to_string(), table_value(dataset))?;
    context.set_value(COLUMNS_BINDING.to_string(), columns_value(dataset))?;

    let value = eval_with_context_mut(code, &mut context)?;
    debug!("script evaluated");

    let replacement = context
        .get_value(RESULT_BINDING)
        .and_then(|v| frame_from_value(v, dataset));

    let message = match value {
        ScriptValue::Empty => "script executed successfully".to_string(),
        other => format!("script executed successfully; output: {}", render(&other)),
    };
    Ok(match replacement {
        Some(frame) => ExecutionResult::success_with(message, frame),
        None => ExecutionResult::success(message),
    })
}

fn table_value(dataset: &DataFrame) -> ScriptValue<NumericTypes> {
    let rows = dataset
        .rows()
        .iter()
        .map(|row| ScriptValue::Tuple(row.iter().map(to_script).collect()))
        .collect();
    ScriptValue::Tuple(rows)
}

fn columns_value(dataset: &DataFrame) -> ScriptValue<NumericTypes> {
    ScriptValue::Tuple(
        dataset
            .columns()
            .iter()
            .map(|c| ScriptValue::String(c.clone()))
            .collect(),
    )
}

fn to_script(value: &JsonValue) -> ScriptValue<NumericTypes> {
    match value {
        JsonValue::Null => ScriptValue::Empty,
        JsonValue::Bool(b) => ScriptValue::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => ScriptValue::Int(i),
            None => ScriptValue::Float(n.as_f64().unwrap_or(0.0)),
        },
        JsonValue::String(s) => ScriptValue::String(s.clone()),
        other => ScriptValue::String(other.to_string()),
    }
}

fn to_json(value: &ScriptValue<NumericTypes>) -> JsonValue {
    match value {
        ScriptValue::Empty => JsonValue::Null,
        ScriptValue::Boolean(b) => JsonValue::Bool(*b),
        ScriptValue::Int(i) => JsonValue::from(*i),
        ScriptValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ScriptValue::String(s) => JsonValue::String(s.clone()),
        ScriptValue::Tuple(items) => JsonValue::Array(items.iter().map(to_json).collect()),
    }
}

fn render(value: &ScriptValue<NumericTypes>) -> String {
    match value {
        ScriptValue::String(s) => s.clone(),
        other => serde_json::to_string(&to_json(other)).unwrap_or_default(),
    }
}

/// Rebuilds a frame from the replacement binding. A tuple of tuples is a
/// row set; a flat tuple of scalars is a single row. Column names are
/// carried over from the source frame when the width matches, otherwise
/// generated.
fn frame_from_value(
    value: &ScriptValue<NumericTypes>,
    source: &DataFrame,
) -> Option<DataFrame> {
    let items = match value {
        ScriptValue::Tuple(items) => items,
        _ => return None,
    };
    let rows: Vec<Vec<JsonValue>> = if items.iter().all(|i| !matches!(i, ScriptValue::Tuple(_))) {
        if items.is_empty() {
            Vec::new()
        } else {
            vec![items.iter().map(to_json).collect()]
        }
    } else {
        items
            .iter()
            .map(|item| match item {
                ScriptValue::Tuple(cells) => cells.iter().map(to_json).collect(),
                scalar => vec![to_json(scalar)],
            })
            .collect()
    };

    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    let columns = if width == source.column_count() && width > 0 {
        source.columns().to_vec()
    } else {
        (1..=width).map(|i| format!("c{i}")).collect()
    };
    Some(DataFrame::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DataFrame {
        DataFrame::new(
            vec!["a".into(), "b".into()],
            vec![vec![json!(1), json!("x")], vec![json!(2), json!("y")]],
        )
    }

    #[tokio::test]
    async fn evaluates_expression_and_reports_output() {
        let adapter = ScriptAdapter;
        let result = adapter.execute("2 + 2", &sample(), &ExecContext::default()).await;
        assert!(result.is_success());
        assert!(result.message.contains('4'));
        assert!(result.dataset.is_none());
    }

    #[tokio::test]
    async fn sees_dataset_under_fixed_binding() {
        let adapter = ScriptAdapter;
        let result = adapter
            .execute("len(table)", &sample(), &ExecContext::default())
            .await;
        assert!(result.is_success());
        assert!(result.message.contains('2'));
    }

    #[tokio::test]
    async fn runtime_fault_becomes_failure_with_unchanged_dataset() {
        let adapter = ScriptAdapter;
        let df = sample();
        let result = adapter
            .execute("1 + no_such_binding", &df, &ExecContext::default())
            .await;
        assert_eq!(result.status, super::super::ExecutionStatus::Failure);
        assert!(result.dataset.is_none());
        assert_eq!(df, sample());
    }

    #[tokio::test]
    async fn replacement_is_read_from_result_binding() {
        let adapter = ScriptAdapter;
        let result = adapter
            .execute(
                "result_table = ((10, \"p\"), (20, \"q\")); \"done\"",
                &sample(),
                &ExecContext::default(),
            )
            .await;
        assert!(result.is_success());
        let frame = result.dataset.expect("replacement frame");
        assert_eq!(frame.columns(), ["a", "b"]);
        assert_eq!(frame.rows()[1][0], json!(20));
    }

    #[tokio::test]
    async fn replacement_with_new_width_gets_generated_columns() {
        let adapter = ScriptAdapter;
        let result = adapter
            .execute(
                "result_table = ((1, 2, 3)); true",
                &sample(),
                &ExecContext::default(),
            )
            .await;
        let frame = result.dataset.expect("replacement frame");
        assert_eq!(frame.columns(), ["c1", "c2", "c3"]);
        assert_eq!(frame.row_count(), 1);
    }
}
