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

use serde::{Deserialize, Serialize};

/// The user's free-text data-processing instruction. Immutable once
/// submitted; the optional hint nudges the oracle towards a language but
/// never overrides routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    text: String,
    language_hint: Option<String>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language_hint: None,
        }
    }

    pub fn with_language_hint(mut self, hint: impl Into<String>) -> Self {
        self.language_hint = Some(hint.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language_hint(&self) -> Option<&str> {
        self.language_hint.as_deref()
    }
}

/// A generated-code proposal as decoded from an oracle response. Only the
/// sanitizer constructs these, and each is consumed exactly once per
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCandidate {
    pub language: Option<String>,
    pub execution: Option<String>,
    pub code: String,
}
