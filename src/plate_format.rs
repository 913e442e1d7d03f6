// src/plate_format.rs

use anyhow::{Context, Result};
use regex::Regex;

/// Canonicalizes raw OCR output and checks it against the configured
/// regional plate grammar.
pub struct PlateFormat {
    grammar: Regex,
}

impl PlateFormat {
    pub fn new(grammar: &str) -> Result<Self> {
        let grammar = Regex::new(grammar)
            .with_context(|| format!("Invalid plate grammar: {grammar}"))?;
        Ok(Self { grammar })
    }

    /// Strip everything outside [A-Za-z0-9] and uppercase the rest.
    /// Total: empty input yields empty output.
    pub fn clean(&self, raw: &str) -> String {
        raw.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }

    /// True iff the cleaned string matches the grammar. Empty input is
    /// never valid, regardless of how permissive the grammar is.
    pub fn is_valid(&self, cleaned: &str) -> bool {
        !cleaned.is_empty() && self.grammar.is_match(cleaned)
    }
}
