//! Transaction reference extraction
//!
//! Payloads are tried as JSON first: candidate keys in configured order, then
//! every string value in document order against the general pattern. Anything
//! that does not parse goes through the free-text patterns instead.

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ReferenceConfig;
use crate::error::Result;
use crate::types::ExtractedReference;

pub struct ReferenceExtractor {
    general: Regex,
    keyword_patterns: Vec<(String, Regex)>,
    candidate_keys: Vec<String>,
    min_key_value_len: usize,
    max_depth: usize,
}

impl ReferenceExtractor {
    pub fn new(config: &ReferenceConfig) -> Result<Self> {
        let general = Regex::new(&config.general_pattern)?;

        // Keyword is case-insensitive, the captured reference is not.
        let keyword_patterns = config
            .keywords
            .iter()
            .map(|keyword| {
                let pattern = format!(
                    r#"(?i:{})["\s:]+({})"#,
                    regex::escape(keyword),
                    config.general_pattern
                );
                Ok((keyword.clone(), Regex::new(&pattern)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            general,
            keyword_patterns,
            candidate_keys: config.candidate_keys.clone(),
            min_key_value_len: config.min_key_value_len,
            max_depth: config.max_depth,
        })
    }

    /// Extract a reference from a raw response body
    pub fn extract_from_payload(&self, raw: &str) -> ExtractedReference {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.extract_from_value(&value),
            Err(e) => {
                debug!("Payload is not JSON ({}), using text patterns", e);
                self.extract_from_text(raw)
            }
        }
    }

    /// Extract a reference from parsed structured data
    pub fn extract_from_value(&self, value: &Value) -> ExtractedReference {
        for key in &self.candidate_keys {
            if let Some(Value::String(candidate)) = lookup(value, key) {
                if candidate.chars().count() >= self.min_key_value_len {
                    debug!("Reference found under key '{}'", key);
                    return ExtractedReference::json_key(candidate.as_str());
                }
            }
        }

        for candidate in self.collect_strings(value) {
            if let Some(found) = self.general.find(candidate) {
                debug!("Reference found in string value");
                return ExtractedReference::text_pattern(found.as_str());
            }
        }

        ExtractedReference::absent()
    }

    /// Extract a reference from free text such as rendered page content
    pub fn extract_from_text(&self, raw: &str) -> ExtractedReference {
        for (keyword, pattern) in &self.keyword_patterns {
            if let Some(found) = pattern.captures(raw).and_then(|c| c.get(1)) {
                debug!("Reference found after '{}'", keyword);
                return ExtractedReference::text_pattern(found.as_str());
            }
        }

        match self.general.find(raw) {
            Some(found) => ExtractedReference::text_pattern(found.as_str()),
            None => ExtractedReference::absent(),
        }
    }

    /// Every string value under `root`, in document order, up to `max_depth`
    fn collect_strings<'a>(&self, root: &'a Value) -> Vec<&'a str> {
        let mut strings = Vec::new();
        let mut truncated = false;
        let mut worklist: Vec<(&Value, usize)> = vec![(root, 0)];

        while let Some((value, depth)) = worklist.pop() {
            match value {
                Value::String(s) => strings.push(s.as_str()),
                Value::Array(items) if depth < self.max_depth => {
                    worklist.extend(items.iter().rev().map(|item| (item, depth + 1)));
                }
                Value::Object(map) if depth < self.max_depth => {
                    worklist.extend(map.values().rev().map(|item| (item, depth + 1)));
                }
                Value::Array(_) | Value::Object(_) => truncated = true,
                _ => {}
            }
        }

        if truncated {
            warn!("Payload nesting exceeds {} levels, deeper values skipped", self.max_depth);
        }
        strings
    }
}

/// Resolve a dotted key path; numeric segments index arrays
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
