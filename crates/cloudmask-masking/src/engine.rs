//! Masking engine
//!
//! Combines a [`PatternCatalog`] with a [`MappingStore`] to rewrite text in
//! both directions. A single engine is one masking session: every call shares
//! the same store, so an identifier masked in a request is restored in the
//! matching response. Use [`MaskingEngine::fork_session`] for an isolated
//! session over the same catalog.

use crate::catalog::PatternCatalog;
use crate::leaks::{scan_for_leaks, LeakedResource};
use crate::store::MappingStore;
use cloudmask_core::{Error, Result};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on detection passes over text that keeps producing matches
const MAX_MASK_PASSES: usize = 8;

/// Shape of every token a catalog can produce
const TOKEN_SHAPE: &str = r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)*_\d{3,}\b";

/// Result of a masking call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskingReport {
    pub masked: String,
    /// Unique values masked in this call, per category
    pub patterns_applied: BTreeMap<String, u64>,
    pub total_patterns: u64,
    #[serde(with = "duration_ms")]
    pub processing_time: Duration,
    pub input_bytes: usize,
}

/// Result of an unmasking call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmaskingReport {
    pub unmasked: String,
    /// Token occurrences replaced with their originals
    pub patterns_restored: u64,
    #[serde(with = "duration_ms")]
    pub processing_time: Duration,
    pub input_bytes: usize,
}

/// A token written by an earlier masking pass, with the input text it replaced
#[derive(Debug, Clone)]
struct InsertedToken {
    start: usize,
    end: usize,
    original: String,
}

impl InsertedToken {
    fn shifted(&self, start: usize) -> Self {
        Self {
            start,
            end: start + (self.end - self.start),
            original: self.original.clone(),
        }
    }
}

/// Input text behind `text[start..end]`: tokens from earlier passes that lie
/// wholly inside the range are replaced by their originals.
fn restore_span<'t>(text: &'t str, inserted: &[InsertedToken], start: usize, end: usize) -> Cow<'t, str> {
    let mut inner = inserted
        .iter()
        .filter(|s| s.start >= start && s.end <= end)
        .peekable();
    if inner.peek().is_none() {
        return Cow::Borrowed(&text[start..end]);
    }

    let mut restored = String::with_capacity(end - start);
    let mut cursor = start;
    for span in inner {
        restored.push_str(&text[cursor..span.start]);
        restored.push_str(&span.original);
        cursor = span.end;
    }
    restored.push_str(&text[cursor..end]);
    Cow::Owned(restored)
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Bidirectional masker for cloud resource identifiers
#[derive(Debug, Clone)]
pub struct MaskingEngine {
    catalog: Arc<PatternCatalog>,
    store: Arc<MappingStore>,
    token_shape: Regex,
}

impl MaskingEngine {
    /// Engine over the built-in catalog with an empty store
    pub fn new() -> Result<Self> {
        Self::with_catalog(Arc::new(PatternCatalog::builtin()?))
    }

    pub fn with_catalog(catalog: Arc<PatternCatalog>) -> Result<Self> {
        Self::with_store(catalog, Arc::new(MappingStore::new()))
    }

    /// Engine sharing an existing store, e.g. across gateway workers
    pub fn with_store(catalog: Arc<PatternCatalog>, store: Arc<MappingStore>) -> Result<Self> {
        let token_shape = Regex::new(TOKEN_SHAPE)
            .map_err(|e| Error::pattern(format!("Failed to compile token shape: {}", e)))?;

        Ok(Self {
            catalog,
            store,
            token_shape,
        })
    }

    /// New session: same catalog, fresh store
    pub fn fork_session(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            store: Arc::new(MappingStore::new()),
            token_shape: self.token_shape.clone(),
        }
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    /// Replace every detected identifier with its token
    pub fn mask(&self, text: &str) -> Result<String> {
        Ok(self.mask_with_report(text)?.masked)
    }

    pub fn mask_with_report(&self, text: &str) -> Result<MaskingReport> {
        let start = Instant::now();
        self.reserve_literal_tokens(text);

        let mut seen: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut current = Cow::Borrowed(text);
        let mut inserted: Vec<InsertedToken> = Vec::new();

        let mut converged = false;
        for _ in 0..MAX_MASK_PASSES {
            match self.rewrite_pass(&current, &inserted, &mut seen)? {
                Some((next, spans)) => {
                    current = Cow::Owned(next);
                    inserted = spans;
                }
                None => {
                    converged = true;
                    break;
                }
            }
        }
        if !converged {
            warn!(
                passes = MAX_MASK_PASSES,
                "Masking did not converge; output may still contain identifiers"
            );
        }

        let patterns_applied: BTreeMap<String, u64> = seen
            .into_iter()
            .map(|(category, values)| (category, values.len() as u64))
            .collect();
        let total_patterns = patterns_applied.values().sum();
        let processing_time = start.elapsed();

        for (category, count) in &patterns_applied {
            metrics::counter!("cloudmask_masked_values_total", "category" => category.clone())
                .increment(*count);
        }
        metrics::histogram!("cloudmask_masking_duration_seconds")
            .record(processing_time.as_secs_f64());

        debug!(
            total_patterns,
            bytes = text.len(),
            elapsed_us = processing_time.as_micros() as u64,
            "Masked text"
        );

        Ok(MaskingReport {
            masked: current.into_owned(),
            patterns_applied,
            total_patterns,
            processing_time,
            input_bytes: text.len(),
        })
    }

    /// Token-shaped words in the input that this store never issued are kept
    /// out of allocation, so unmasking cannot rewrite them.
    fn reserve_literal_tokens(&self, text: &str) {
        for m in self.token_shape.find_iter(text) {
            let literal = m.as_str();
            let Some((prefix, _)) = literal.rsplit_once('_') else {
                continue;
            };
            if self.catalog.patterns().iter().any(|p| p.prefix() == prefix) {
                self.store.reserve(literal);
            }
        }
    }

    /// One detect-and-replace pass; `None` when nothing matched.
    ///
    /// `inserted` lists the tokens earlier passes wrote into `text`. A match
    /// that contains one of them is stored with the token swapped back for
    /// its original, so the store only ever holds input text.
    fn rewrite_pass(
        &self,
        text: &str,
        inserted: &[InsertedToken],
        seen: &mut BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Option<(String, Vec<InsertedToken>)>> {
        let matches = self.catalog.find(text);
        if matches.is_empty() {
            return Ok(None);
        }

        let mut out = String::with_capacity(text.len());
        let mut spans = Vec::with_capacity(inserted.len() + matches.len());
        let mut earlier = inserted.iter().peekable();
        let mut cursor = 0;

        for m in &matches {
            let original = restore_span(text, inserted, m.start, m.end);
            let token =
                self.store
                    .get_or_create(&original, m.pattern.category(), m.pattern.prefix())?;

            // Earlier tokens before this match move; ones inside it are absorbed.
            while let Some(span) = earlier.next_if(|s| s.start < m.end) {
                if span.end <= m.start {
                    spans.push(span.shifted(out.len() + (span.start - cursor)));
                }
            }

            out.push_str(&text[cursor..m.start]);
            let token_start = out.len();
            out.push_str(&token);
            cursor = m.end;

            seen.entry(m.pattern.category().to_string())
                .or_default()
                .insert(original.to_string());
            spans.push(InsertedToken {
                start: token_start,
                end: out.len(),
                original: original.into_owned(),
            });
        }
        for span in earlier {
            spans.push(span.shifted(out.len() + (span.start - cursor)));
        }
        out.push_str(&text[cursor..]);

        Ok(Some((out, spans)))
    }

    /// Mask every string leaf of a JSON value. Keys, numbers, booleans and
    /// nulls are left untouched.
    pub fn mask_value(&self, value: &Value) -> Result<Value> {
        let masked = match value {
            Value::String(s) => Value::String(self.mask(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.mask_value(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    out.insert(key.clone(), self.mask_value(field)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        };
        Ok(masked)
    }

    /// Replace every token known to this session with its original.
    /// Unknown token-shaped text is left as is.
    pub fn unmask(&self, text: &str) -> String {
        self.unmask_with_report(text).unmasked
    }

    pub fn unmask_with_report(&self, text: &str) -> UnmaskingReport {
        let start = Instant::now();
        let mut patterns_restored = 0u64;

        let unmasked = self
            .token_shape
            .replace_all(text, |caps: &Captures<'_>| {
                let candidate = &caps[0];
                match self.store.reverse(candidate) {
                    Some(original) => {
                        patterns_restored += 1;
                        original
                    }
                    None => candidate.to_string(),
                }
            })
            .into_owned();

        let processing_time = start.elapsed();
        metrics::counter!("cloudmask_restored_tokens_total").increment(patterns_restored);

        UnmaskingReport {
            unmasked,
            patterns_restored,
            processing_time,
            input_bytes: text.len(),
        }
    }

    pub fn unmask_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.unmask(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.unmask_value(item)).collect())
            }
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, field)| (key.clone(), self.unmask_value(field)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Catalog matches still present in `text`
    pub fn scan_for_leaks(&self, text: &str) -> Vec<LeakedResource> {
        scan_for_leaks(&self.catalog, text)
    }
}
