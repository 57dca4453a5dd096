//! Keyword pre-filter and location heuristic: fast, no engine call.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ClassifierError;

static LOCATION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:in|at|near)\s+([\w\s]+)").ok());

/// Case-insensitive word-prefix keyword matcher.
///
/// `rent` matches "Rent", "rental" and "renting" but not "parent".
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    /// `None` when no usable keywords were configured.
    pattern: Option<Regex>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, ClassifierError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        // An empty alternation would match everything.
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})", alternatives.join("|")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }
}

/// Pull a place name out of free text: the words after "in", "at" or "near".
pub fn extract_location(text: &str) -> Option<String> {
    let pattern = LOCATION_PATTERN.as_ref()?;
    let captured = pattern.captures(text)?.get(1)?.as_str().trim();
    if captured.is_empty() {
        None
    } else {
        Some(captured.to_string())
    }
}
