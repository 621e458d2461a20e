//! Masking configuration

use crate::catalog::PatternSpec;
use serde::{Deserialize, Serialize};

/// Adjustments applied on top of the built-in pattern catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskingConfig {
    /// Built-in categories to switch off, by category id
    #[serde(default)]
    pub disabled_categories: Vec<String>,

    /// Additional rules, appended after the built-ins
    #[serde(default)]
    pub custom_patterns: Vec<PatternSpec>,
}
