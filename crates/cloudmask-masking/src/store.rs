//! Bidirectional mapping store
//!
//! Holds the bijection between original identifiers and their masking tokens.
//! Tokens are `{PREFIX}_{NNN}` with a per-category counter starting at 1 and
//! zero-padded to at least three digits. Once allocated, a mapping never
//! changes until [`MappingStore::clear`] is called.

use cloudmask_core::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Format a token from its prefix and sequence number
pub fn format_token(prefix: &str, sequence: u64) -> String {
    format!("{}_{:03}", prefix, sequence)
}

/// One original ↔ token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub original: String,
    pub token: String,
    pub category: String,
    /// Position in the category's counter
    pub sequence: u64,
}

/// Snapshot of store occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingStats {
    /// Last allocated sequence number per category
    pub per_category: BTreeMap<String, u64>,
    pub total_entries: usize,
}

#[derive(Debug, Default)]
struct Tables {
    forward: HashMap<String, Arc<MappingEntry>>,
    reverse: HashMap<String, Arc<MappingEntry>>,
    counters: HashMap<String, u64>,
    /// Token-shaped text seen verbatim in input; never allocated
    reserved: HashSet<String>,
}

/// Thread-safe bidirectional mapping between originals and tokens
#[derive(Debug, Default)]
pub struct MappingStore {
    tables: RwLock<Tables>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the token for `original`, allocating the next one for `category`
    /// if this original has never been seen.
    ///
    /// An original keeps the token it was first given, even if a later call
    /// names a different category. Allocation is atomic: concurrent callers
    /// with the same original always receive the same token.
    pub fn get_or_create(&self, original: &str, category: &str, prefix: &str) -> Result<String> {
        if let Some(entry) = self.tables.read().forward.get(original) {
            return Ok(entry.token.clone());
        }

        let mut tables = self.tables.write();

        // Another writer may have allocated between the two locks.
        if let Some(entry) = tables.forward.get(original) {
            return Ok(entry.token.clone());
        }

        let Tables {
            counters, reserved, ..
        } = &mut *tables;
        let counter = counters.entry(category.to_string()).or_insert(0);
        let (sequence, token) = loop {
            *counter += 1;
            let token = format_token(prefix, *counter);
            if !reserved.contains(&token) {
                break (*counter, token);
            }
        };

        if let Some(existing) = tables.reverse.get(&token) {
            error!(
                token = %token,
                category = %category,
                existing_category = %existing.category,
                "Token already mapped to a different original"
            );
            return Err(Error::mapping_invariant(format!(
                "token {} already maps to a value of category '{}'",
                token, existing.category
            )));
        }

        let entry = Arc::new(MappingEntry {
            original: original.to_string(),
            token: token.clone(),
            category: category.to_string(),
            sequence,
        });
        tables.forward.insert(entry.original.clone(), Arc::clone(&entry));
        tables.reverse.insert(token.clone(), entry);

        debug!(category = %category, token = %token, "Allocated masking token");
        Ok(token)
    }

    /// Keep `token` out of allocation because it already appears verbatim in
    /// text being masked. Returns false when the token is already allocated.
    pub fn reserve(&self, token: &str) -> bool {
        if self.tables.read().reserved.contains(token) {
            return true;
        }

        let mut tables = self.tables.write();
        if tables.reverse.contains_key(token) {
            return false;
        }
        if tables.reserved.insert(token.to_string()) {
            debug!(token = %token, "Reserved literal token");
        }
        true
    }

    pub fn is_reserved(&self, token: &str) -> bool {
        self.tables.read().reserved.contains(token)
    }

    /// Original for a token, if the token was allocated by this store
    pub fn reverse(&self, token: &str) -> Option<String> {
        self.tables
            .read()
            .reverse
            .get(token)
            .map(|entry| entry.original.clone())
    }

    /// Token for an original, without allocating
    pub fn forward(&self, original: &str) -> Option<String> {
        self.tables
            .read()
            .forward
            .get(original)
            .map(|entry| entry.token.clone())
    }

    pub fn stats(&self) -> MappingStats {
        let tables = self.tables.read();
        MappingStats {
            per_category: tables
                .counters
                .iter()
                .map(|(category, count)| (category.clone(), *count))
                .collect(),
            total_entries: tables.forward.len(),
        }
    }

    /// All mappings, ordered by category then sequence
    pub fn entries(&self) -> Vec<MappingEntry> {
        let tables = self.tables.read();
        let mut entries: Vec<MappingEntry> =
            tables.reverse.values().map(|e| MappingEntry::clone(e)).collect();
        entries.sort_by(|a, b| a.category.cmp(&b.category).then(a.sequence.cmp(&b.sequence)));
        entries
    }

    /// Drop every mapping and reservation and reset all counters
    pub fn clear(&self) {
        let mut tables = self.tables.write();
        let dropped = tables.forward.len();
        *tables = Tables::default();
        info!(dropped, "Mapping store cleared");
    }

    pub fn len(&self) -> usize {
        self.tables.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
