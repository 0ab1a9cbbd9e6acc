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

use std::path::Path;

use serde_json::Value;
use tracing::info;

use super::DataFrame;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse delimited file: {0}")]
    Delimited(#[from] csv::Error),
    #[error("failed to parse record file: {0}")]
    Records(#[from] serde_json::Error),
    #[error("record file must contain an array of objects")]
    NotRecordShaped,
    #[error("unsupported file format '{0}'")]
    UnsupportedFormat(String),
}

/// Loads a tabular dataset, resolving the format by file extension.
///
/// Delimited text (`.csv`, `.tsv`) and structured records (`.json`,
/// `.jsonl`) are supported. Spreadsheet extensions are recognised but
/// rejected; everything else is `UnsupportedFormat`.
pub fn load(path: &Path) -> Result<DataFrame, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let mut frame = match ext.as_str() {
        "csv" => load_delimited(path, b',')?,
        "tsv" => load_delimited(path, b'\t')?,
        "json" => load_records(path)?,
        "jsonl" => load_record_lines(path)?,
        "xls" | "xlsx" => return Err(LoadError::UnsupportedFormat(ext)),
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    frame.normalise_columns();
    info!(
        rows = frame.row_count(),
        columns = frame.column_count(),
        "dataset loaded from {}",
        path.display()
    );
    Ok(frame)
}

fn load_delimited(path: &Path, delimiter: u8) -> Result<DataFrame, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = record.iter().map(parse_scalar).collect::<Vec<_>>();
        // Ragged lines are sized to the header: short rows gain trailing
        // nulls, stray extra cells are dropped.
        row.resize(columns.len(), Value::Null);
        rows.push(row);
    }
    Ok(DataFrame::new(columns, rows))
}

fn load_records(path: &Path) -> Result<DataFrame, LoadError> {
    let text = read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    let array = value.as_array().ok_or(LoadError::NotRecordShaped)?;
    frame_from_objects(array)
}

fn load_record_lines(path: &Path) -> Result<DataFrame, LoadError> {
    let text = read_to_string(path)?;
    let mut objects = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        objects.push(serde_json::from_str::<Value>(line)?);
    }
    frame_from_objects(&objects)
}

fn frame_from_objects(objects: &[Value]) -> Result<DataFrame, LoadError> {
    let mut columns: Vec<String> = Vec::new();
    for obj in objects {
        let map = obj.as_object().ok_or(LoadError::NotRecordShaped)?;
        for key in map.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    let rows = objects
        .iter()
        .map(|obj| {
            let map = obj.as_object().expect("checked above");
            columns
                .iter()
                .map(|c| map.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(DataFrame::new(columns, rows))
}

fn read_to_string(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Numeric-looking cells become JSON numbers so the relational adapter can
/// materialise them with a numeric affinity; everything else stays a string.
fn parse_scalar(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(trimmed.to_string())
}
