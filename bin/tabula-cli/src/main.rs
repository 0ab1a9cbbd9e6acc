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

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use tabula::{dataset, DataFrame, Engine, EngineError, FsRunLogger, HttpOracle, Task};
use tracing::error;

const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "tsv", "json", "jsonl"];

/// Interactive front end: load a tabular dataset, then hand free-text
/// tasks to the engine until the user exits.
#[derive(Debug, Parser)]
#[command(name = "tabula", version, about = "Run free-text tasks against tabular data")]
struct Cli {
    /// Dataset file to load. When omitted, a filename is requested
    /// interactively and fuzzy-matched against the data directory.
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Text file holding the task instructions. Runs a single task
    /// non-interactively, against an empty dataset unless --data is given.
    #[arg(short, long)]
    task_file: Option<PathBuf>,

    /// Directory searched when matching an interactive filename.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Maximum generation attempts per task.
    #[arg(long, default_value_t = 4)]
    max_attempts: usize,

    /// Directory receiving the per-attempt audit trail.
    #[arg(long, default_value = FsRunLogger::DEFAULT_DIR)]
    log_dir: PathBuf,

    /// Optional language hint forwarded to the oracle.
    #[arg(long)]
    language: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let oracle = HttpOracle::from_env().context("oracle configuration")?;
    let engine = Engine::new(Arc::new(oracle))
        .with_max_attempts(cli.max_attempts)
        .with_run_logger(Arc::new(FsRunLogger::new(&cli.log_dir)));

    if let Some(task_path) = &cli.task_file {
        return run_from_task_file(&engine, &cli, task_path).await;
    }

    let path = match cli.data.clone() {
        Some(path) => path,
        None => prompt_for_dataset(&cli.data_dir)?,
    };
    let mut frame = dataset::loader::load(&path)
        .with_context(|| format!("could not load dataset from {}", path.display()))?;

    println!("\nTabula Interactive Session");
    println!("═══════════════════════════════════════════════════════════════");
    println!("Dataset: {} ({} rows)", path.display(), frame.row_count());
    println!();
    println!("{}", frame.preview(5));
    println!();
    println!("Describe what to do with the data in plain language.");
    println!("   Examples: \"total the amount column by region\"");
    println!("             \"which rows have a missing price?\"");
    println!("   - Results that produce a new table replace the working dataset.");
    println!("   - Type 'exit' to quit.");
    println!("═══════════════════════════════════════════════════════════════");

    loop {
        print!("\nEnter your task: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        println!("{}", "─".repeat(80));

        let mut task = Task::new(input);
        if let Some(hint) = &cli.language {
            task = task.with_language_hint(hint.clone());
        }

        match engine.run(&task, frame.clone()).await {
            Ok(outcome) => {
                println!("{}", outcome.message);
                if outcome.attempts > 1 {
                    println!("(succeeded on attempt {})", outcome.attempts);
                }
                frame = outcome.dataset;
            }
            Err(EngineError::RetryExhausted { session }) => {
                error!("all {} attempts failed", session.attempts());
                println!("Could not complete the task after {} attempts.", session.attempts());
                if let Some(last) = session.last_error() {
                    println!("Last error: {last}");
                }
            }
            Err(e) => {
                error!("task aborted: {e}");
                println!("Task aborted: {e}");
            }
        }

        println!("{}", "─".repeat(80));
    }

    Ok(())
}

/// Batch mode: the task comes from a text file instead of the prompt.
/// With no dataset the engine runs against an empty frame, which suits
/// tasks whose code acts on external resources.
async fn run_from_task_file(engine: &Engine, cli: &Cli, task_path: &Path) -> anyhow::Result<()> {
    let text = read_task_file(task_path)?;
    let frame = match &cli.data {
        Some(path) => dataset::loader::load(path)
            .with_context(|| format!("could not load dataset from {}", path.display()))?,
        None => DataFrame::empty(),
    };

    let mut task = Task::new(text);
    if let Some(hint) = &cli.language {
        task = task.with_language_hint(hint.clone());
    }

    match engine.run(&task, frame).await {
        Ok(outcome) => {
            println!("{}", outcome.message);
            if outcome.attempts > 1 {
                println!("(succeeded on attempt {})", outcome.attempts);
            }
            Ok(())
        }
        Err(EngineError::RetryExhausted { session }) => {
            error!("all {} attempts failed", session.attempts());
            match session.last_error() {
                Some(last) => bail!(
                    "could not complete the task after {} attempts; last error: {last}",
                    session.attempts()
                ),
                None => bail!("could not complete the task after {} attempts", session.attempts()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn read_task_file(path: &Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read task file {}", path.display()))?;
    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("task file {} is empty", path.display());
    }
    Ok(text)
}

/// Asks for a filename and resolves it against the data directory,
/// accepting close matches so `sales` finds `sales_2024.csv`.
fn prompt_for_dataset(dir: &Path) -> anyhow::Result<PathBuf> {
    let candidates = dataset_candidates(dir)?;
    if candidates.is_empty() {
        bail!(
            "no dataset files ({}) found under {}",
            SUPPORTED_EXTENSIONS.join("/"),
            dir.display()
        );
    }

    println!("Available datasets in {}:", dir.display());
    for name in &candidates {
        println!("  - {}", name.display());
    }

    loop {
        print!("\nDataset file: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(path) = resolve_dataset(input, &candidates) {
            return Ok(dir.join(path));
        }
        println!("No dataset matching '{input}'. Try one of the names listed above.");
    }
}

fn dataset_candidates(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("could not read data directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = PathBuf::from(entry.file_name());
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates)
}

/// Exact name first, then the best fuzzy match.
fn resolve_dataset(input: &str, candidates: &[PathBuf]) -> Option<PathBuf> {
    if let Some(exact) = candidates.iter().find(|c| c.as_os_str() == input) {
        return Some(exact.clone());
    }
    let matcher = SkimMatcherV2::default();
    candidates
        .iter()
        .filter_map(|c| {
            matcher
                .fuzzy_match(&c.to_string_lossy(), input)
                .map(|score| (score, c))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, c)| c.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn task_file_text_is_read_and_trimmed() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "  total the amount column  ").expect("write");
        let text = read_task_file(file.path()).expect("task text");
        assert_eq!(text, "total the amount column");
    }

    #[test]
    fn empty_task_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let err = read_task_file(file.path()).expect_err("should reject");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn exact_filename_wins_over_fuzzy() {
        let candidates = vec![PathBuf::from("sales.csv"), PathBuf::from("sales_2024.csv")];
        assert_eq!(
            resolve_dataset("sales.csv", &candidates),
            Some(PathBuf::from("sales.csv"))
        );
    }

    #[test]
    fn partial_name_fuzzy_matches() {
        let candidates = vec![PathBuf::from("inventory.jsonl"), PathBuf::from("sales_2024.csv")];
        assert_eq!(
            resolve_dataset("sales", &candidates),
            Some(PathBuf::from("sales_2024.csv"))
        );
    }

    #[test]
    fn unrelated_name_does_not_match() {
        let candidates = vec![PathBuf::from("inventory.jsonl")];
        assert_eq!(resolve_dataset("zzzz", &candidates), None);
    }
}
