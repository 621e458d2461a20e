//! Leak detection over already-masked text

use crate::catalog::PatternCatalog;
use serde::Serialize;
use std::collections::HashMap;

/// Maximum number of example values reported per category
pub const MAX_LEAK_EXAMPLES: usize = 3;

/// Identifiers of one category that survived masking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakedResource {
    pub category: String,
    /// Number of matches, including repeats
    pub count: usize,
    /// Up to three distinct matched values
    pub examples: Vec<String>,
}

/// Report every catalog match in `text`, grouped by category in catalog order.
///
/// Text produced by masking should yield an empty report.
pub fn scan_for_leaks(catalog: &PatternCatalog, text: &str) -> Vec<LeakedResource> {
    let mut grouped: HashMap<&str, LeakedResource> = HashMap::new();

    for m in catalog.find(text) {
        let leak = grouped
            .entry(m.pattern.category())
            .or_insert_with(|| LeakedResource {
                category: m.pattern.category().to_string(),
                count: 0,
                examples: Vec::new(),
            });
        leak.count += 1;
        if leak.examples.len() < MAX_LEAK_EXAMPLES && !leak.examples.iter().any(|e| e == m.value) {
            leak.examples.push(m.value.to_string());
        }
    }

    catalog
        .categories()
        .filter_map(|category| grouped.remove(category))
        .collect()
}
