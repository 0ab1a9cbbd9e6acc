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

//! Embedded relational adapter.
//!
//! The current dataset is materialised into an ephemeral in-memory SQLite
//! store under a fixed table name. All statements but the last run for
//! side effects; the last statement produces the result frame. An empty
//! result set is not a failure: the projection tokens are fuzzy-matched
//! against the known column names and the closest one is suggested.

use async_trait::async_trait;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{ExecContext, ExecutionResult, RuntimeAdapter};
use crate::dataset::DataFrame;

/// Fixed name of the materialised table.
pub const TABLE_NAME: &str = "t";

#[derive(Debug, Default)]
pub struct SqlAdapter;

#[async_trait]
impl RuntimeAdapter for SqlAdapter {
    fn name(&self) -> &str {
        "sql"
    }

    async fn execute(
        &self,
        code: &str,
        dataset: &DataFrame,
        _ctx: &ExecContext,
    ) -> ExecutionResult {
        match run_sql(code, dataset) {
            Ok(result) => result,
            Err(e) => ExecutionResult::failure(format!("SQL error: {e}")),
        }
    }
}

fn run_sql(code: &str, dataset: &DataFrame) -> Result<ExecutionResult, rusqlite::Error> {
    let conn = Connection::open_in_memory()?;
    materialise(&conn, dataset)?;

    let statements: Vec<&str> = code
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if statements.is_empty() {
        return Ok(ExecutionResult::failure("SQL code is empty"));
    }

    for stmt in &statements[..statements.len() - 1] {
        conn.execute_batch(&format!("{stmt};"))?;
    }

    let last = statements[statements.len() - 1];
    let mut stmt = match conn.prepare(last) {
        Ok(stmt) => stmt,
        Err(e) => {
            let mut message = format!("SQL error: {e}");
            if let Some(missing) = missing_column(&e) {
                if let Some(suggestion) = closest_column(&missing, dataset.columns()) {
                    message.push_str(&format!("; did you mean column '{suggestion}'?"));
                }
            }
            return Ok(ExecutionResult::failure(message));
        }
    };
    if stmt.column_count() == 0 {
        stmt.execute([])?;
        return Ok(ExecutionResult::success(
            "SQL executed; final statement produced no result set",
        ));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows_out: Vec<Vec<JsonValue>> = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut out = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            out.push(sql_to_json(row.get::<_, SqlValue>(i)?));
        }
        rows_out.push(out);
    }
    debug!(rows = rows_out.len(), "SQL result set fetched");

    if rows_out.is_empty() {
        let mut message = "SQL executed, but no data was returned".to_string();
        if let Some(suggestion) = suggest_column(last, dataset.columns()) {
            message.push_str(&format!("; did you mean column '{suggestion}'?"));
        }
        return Ok(ExecutionResult::success(message));
    }

    let frame = DataFrame::new(columns, rows_out);
    let preview = frame.preview(5);
    Ok(ExecutionResult::success_with(
        format!("SQL executed; result:\n{preview}"),
        frame,
    ))
}

fn materialise(conn: &Connection, dataset: &DataFrame) -> Result<(), rusqlite::Error> {
    if dataset.columns().is_empty() {
        // Nothing to materialise; queries against `t` will fail naturally.
        return Ok(());
    }
    let decls = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("\"{}\" {}", c.replace('"', ""), column_affinity(dataset, i)))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(&format!("CREATE TABLE \"{TABLE_NAME}\" ({decls})"), [])?;

    let placeholders = vec!["?"; dataset.column_count()].join(", ");
    let insert = format!("INSERT INTO \"{TABLE_NAME}\" VALUES ({placeholders})");
    let mut stmt = conn.prepare(&insert)?;
    for row in dataset.rows() {
        let params: Vec<SqlValue> = row.iter().map(json_to_sql).collect();
        stmt.execute(rusqlite::params_from_iter(params))?;
    }
    Ok(())
}

fn column_affinity(dataset: &DataFrame, index: usize) -> &'static str {
    let mut saw_float = false;
    let mut saw_other = false;
    for row in dataset.rows() {
        match row.get(index) {
            Some(JsonValue::Null) => {}
            Some(JsonValue::Number(n)) => {
                if n.as_i64().is_none() {
                    saw_float = true;
                }
            }
            Some(_) => saw_other = true,
            None => {}
        }
    }
    if saw_other {
        "TEXT"
    } else if saw_float {
        "REAL"
    } else {
        "INTEGER"
    }
}

fn json_to_sql(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(*b as i64),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(i) => JsonValue::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        SqlValue::Text(s) => JsonValue::String(s),
        SqlValue::Blob(b) => JsonValue::String(format!("<{} bytes>", b.len())),
    }
}

fn missing_column(error: &rusqlite::Error) -> Option<String> {
    let text = error.to_string();
    let pos = text.find("no such column:")?;
    Some(text[pos + "no such column:".len()..].trim().to_string())
}

/// Closest known column to a single (possibly misspelt) identifier.
fn closest_column(token: &str, columns: &[String]) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    let mut best: Option<(i64, String)> = None;
    for column in columns {
        if let Some(score) = matcher
            .fuzzy_match(column, token)
            .or_else(|| matcher.fuzzy_match(token, column))
        {
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, column.clone()));
            }
        }
    }
    best.map(|(_, column)| column)
}

/// Fuzzy-matches tokens from the projection clause of the final query
/// against the known column names and returns the closest column, if any.
fn suggest_column(query: &str, columns: &[String]) -> Option<String> {
    let line = query
        .lines()
        .find(|l| l.to_ascii_uppercase().contains("SELECT"))?;
    let upper = line.to_ascii_uppercase();
    let select_pos = upper.find("SELECT")?;
    let after_select = &line[select_pos + "SELECT".len()..];
    let projection = match after_select.to_ascii_uppercase().find(" FROM") {
        Some(pos) => &after_select[..pos],
        None => after_select,
    };

    let keywords = ["DISTINCT", "ALL", "AS", "*"];
    let matcher = SkimMatcherV2::default();
    let mut best: Option<(i64, String)> = None;
    for token in projection
        .split(|c: char| c == ',' || c.is_whitespace() || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .filter(|t| !keywords.contains(&t.to_ascii_uppercase().as_str()))
    {
        for column in columns {
            if column == token {
                continue;
            }
            if let Some(score) = matcher
                .fuzzy_match(column, token)
                .or_else(|| matcher.fuzzy_match(token, column))
            {
                if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                    best = Some((score, column.clone()));
                }
            }
        }
    }
    best.map(|(_, column)| column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionStatus;
    use serde_json::json;

    fn sample() -> DataFrame {
        DataFrame::new(
            vec!["a".into(), "b".into()],
            vec![
                vec![json!(1), json!("x")],
                vec![json!(2), json!("y")],
                vec![json!(3), json!("z")],
            ],
        )
    }

    #[tokio::test]
    async fn projects_single_column_preserving_order() {
        let adapter = SqlAdapter;
        let result = adapter
            .execute("SELECT a FROM t;", &sample(), &ExecContext::default())
            .await;
        assert!(result.is_success());
        let frame = result.dataset.expect("result frame");
        assert_eq!(frame.columns(), ["a"]);
        let values: Vec<_> = frame.rows().iter().map(|r| r[0].clone()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn empty_result_is_a_warning_not_a_failure() {
        let adapter = SqlAdapter;
        let result = adapter
            .execute(
                "SELECT a FROM t WHERE b = 'nope';",
                &sample(),
                &ExecContext::default(),
            )
            .await;
        assert!(result.is_success());
        assert!(result.message.contains("no data"));
        assert!(result.dataset.is_none());
    }

    #[tokio::test]
    async fn nonexistent_close_column_gets_a_suggestion() {
        let adapter = SqlAdapter;
        let df = DataFrame::new(
            vec!["amount".into(), "b".into()],
            vec![vec![json!(5), json!("x")]],
        );
        let result = adapter
            .execute("SELECT amont FROM t;", &df, &ExecContext::default())
            .await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.message.contains("did you mean column 'amount'"));
    }

    #[tokio::test]
    async fn suggestion_names_string_close_column() {
        let columns = vec!["amount".to_string(), "b".to_string()];
        let close = suggest_column("SELECT amont FROM t", &columns);
        assert_eq!(close.as_deref(), Some("amount"));
    }

    #[tokio::test]
    async fn side_effect_statements_run_before_final_query() {
        let adapter = SqlAdapter;
        let code = "CREATE TABLE extra (n INTEGER); INSERT INTO extra VALUES (42); SELECT n FROM extra;";
        let result = adapter.execute(code, &sample(), &ExecContext::default()).await;
        assert!(result.is_success());
        let frame = result.dataset.expect("result frame");
        assert_eq!(frame.rows()[0][0], json!(42));
    }

    #[tokio::test]
    async fn faulty_sql_is_failure_not_panic() {
        let adapter = SqlAdapter;
        let result = adapter
            .execute("SELECT definitely_missing FROM t;", &sample(), &ExecContext::default())
            .await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.message.contains("SQL error"));
    }

    #[tokio::test]
    async fn final_statement_without_result_set_is_success() {
        let adapter = SqlAdapter;
        let result = adapter
            .execute(
                "UPDATE t SET b = 'w' WHERE a = 1;",
                &sample(),
                &ExecContext::default(),
            )
            .await;
        assert!(result.is_success());
        assert!(result.dataset.is_none());
    }
}
