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

//! Maps a sanitized candidate to a runtime.
//!
//! Precedence: an explicit `execution` declaration wins outright, then an
//! explicit `language` declaration, then lexical inference over the code
//! body, then the in-process script runtime. Routing is total and
//! deterministic; the only error is an explicit declaration naming a
//! runtime nothing here supports, which is terminal rather than retried
//! (the oracle asserted an environment we cannot provide, so a corrected
//! body would not help).

use thiserror::Error;
use tracing::debug;

use crate::types::CodeCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Script,
    Sql,
    R,
    Julia,
    Matlab,
    Session,
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("declared runtime '{0}' is not supported")]
    Unsupported(String),
}

pub struct Router {
    classifier: LexicalClassifier,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            classifier: LexicalClassifier::standard(),
        }
    }
}

impl Router {
    pub fn with_classifier(classifier: LexicalClassifier) -> Self {
        Self { classifier }
    }

    pub fn route(&self, candidate: &CodeCandidate) -> Result<RuntimeKind, RoutingError> {
        if let Some(declared) = candidate.execution.as_deref() {
            return recognise(declared).ok_or_else(|| RoutingError::Unsupported(declared.into()));
        }
        if let Some(declared) = candidate.language.as_deref() {
            if let Some(kind) = recognise(declared) {
                return Ok(kind);
            }
            return Err(RoutingError::Unsupported(declared.into()));
        }
        let kind = self.classifier.classify(&candidate.code);
        debug!(?kind, "runtime inferred lexically");
        Ok(kind)
    }
}

/// Recognised declaration spellings. Declarations arrive lowercased from
/// the sanitizer, but this is tolerant of raw input too.
fn recognise(declared: &str) -> Option<RuntimeKind> {
    match declared.trim().to_ascii_lowercase().as_str() {
        "script" | "expr" | "expression" => Some(RuntimeKind::Script),
        "sql" | "sqlite" | "relational" => Some(RuntimeKind::Sql),
        "r" | "rscript" => Some(RuntimeKind::R),
        "julia" => Some(RuntimeKind::Julia),
        "matlab" | "octave" => Some(RuntimeKind::Matlab),
        "sas" | "session" => Some(RuntimeKind::Session),
        _ => None,
    }
}

/// One inference rule: the candidate wins when `all_of` markers are all
/// present, or when any `any_of` marker is. Matching is case-insensitive
/// over the whole code body.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub kind: RuntimeKind,
    pub all_of: &'static [&'static str],
    pub any_of: &'static [&'static str],
}

/// Ordered rule table; first matching rule wins, falling back to Script.
/// Keeping the rules as data keeps inference inspectable and testable
/// without touching the router.
pub struct LexicalClassifier {
    rules: Vec<ClassifierRule>,
}

impl LexicalClassifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            ClassifierRule {
                kind: RuntimeKind::Sql,
                all_of: &["select", "from"],
                any_of: &["insert into", "update ", "create table", "delete from"],
            },
            ClassifierRule {
                kind: RuntimeKind::Session,
                all_of: &["proc ", "run;"],
                any_of: &["data _null_"],
            },
            ClassifierRule {
                kind: RuntimeKind::R,
                all_of: &[],
                any_of: &["library(", "<-", "data.frame("],
            },
            ClassifierRule {
                kind: RuntimeKind::Julia,
                all_of: &[],
                any_of: &["using dataframes", "println(", "function ", "end\n"],
            },
            ClassifierRule {
                kind: RuntimeKind::Matlab,
                all_of: &[],
                any_of: &["disp(", "fprintf(", "readtable("],
            },
        ])
    }

    pub fn classify(&self, code: &str) -> RuntimeKind {
        let lower = code.to_ascii_lowercase();
        for rule in &self.rules {
            let all = !rule.all_of.is_empty() && rule.all_of.iter().all(|m| lower.contains(m));
            let any = rule.any_of.iter().any(|m| lower.contains(m));
            if all || any {
                return rule.kind;
            }
        }
        RuntimeKind::Script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        language: Option<&str>,
        execution: Option<&str>,
        code: &str,
    ) -> CodeCandidate {
        CodeCandidate {
            language: language.map(str::to_string),
            execution: execution.map(str::to_string),
            code: code.to_string(),
        }
    }

    #[test]
    fn explicit_execution_beats_language_and_body() {
        let router = Router::default();
        let c = candidate(Some("r"), Some("sql"), "library(dplyr)");
        assert_eq!(router.route(&c).unwrap(), RuntimeKind::Sql);
    }

    #[test]
    fn language_declaration_wins_over_body() {
        let router = Router::default();
        let c = candidate(Some("julia"), None, "SELECT a FROM t;");
        assert_eq!(router.route(&c).unwrap(), RuntimeKind::Julia);
    }

    #[test]
    fn unsupported_declaration_is_terminal() {
        let router = Router::default();
        let c = candidate(None, Some("cobol"), "whatever");
        assert!(matches!(
            router.route(&c),
            Err(RoutingError::Unsupported(d)) if d == "cobol"
        ));
    }

    #[test]
    fn classifier_fixture_table() {
        let classifier = LexicalClassifier::standard();
        let cases: &[(&str, RuntimeKind)] = &[
            ("SELECT name, total FROM t WHERE total > 5", RuntimeKind::Sql),
            ("insert into t values (1, 'a')", RuntimeKind::Sql),
            ("proc means data=work.t;\nrun;", RuntimeKind::Session),
            ("library(dplyr)\nresult <- t", RuntimeKind::R),
            ("x <- c(1, 2, 3)", RuntimeKind::R),
            ("using DataFrames\nprintln(first(df))", RuntimeKind::Julia),
            ("disp(mean(t.amount))", RuntimeKind::Matlab),
            ("2 + 2", RuntimeKind::Script),
            ("len(table)", RuntimeKind::Script),
        ];
        for (code, expected) in cases {
            assert_eq!(classifier.classify(code), *expected, "code: {code}");
        }
    }

    #[test]
    fn undeclared_falls_through_to_classifier() {
        let router = Router::default();
        let c = candidate(None, None, "SELECT a FROM t;");
        assert_eq!(router.route(&c).unwrap(), RuntimeKind::Sql);
        let c = candidate(None, None, "min(1, 2)");
        assert_eq!(router.route(&c).unwrap(), RuntimeKind::Script);
    }
}
