//! cloudmask Masking
//!
//! Reversible masking of cloud resource identifiers in free text.
//!
//! Identifiers are detected by an ordered [`PatternCatalog`] and replaced with
//! stable tokens such as `AWS_EC2_001`. The [`MappingStore`] remembers every
//! substitution so that tokens in a model's reply can be restored by
//! [`MaskingEngine::unmask`].
//!
//! ```
//! use cloudmask_masking::MaskingEngine;
//!
//! let engine = MaskingEngine::new().unwrap();
//! let masked = engine.mask("Instance i-1234567890abcdef0 is running").unwrap();
//! assert_eq!(masked, "Instance AWS_EC2_001 is running");
//! assert_eq!(engine.unmask(&masked), "Instance i-1234567890abcdef0 is running");
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod leaks;
pub mod store;

pub use catalog::{
    builtin_specs, is_public_ipv4, PatternCatalog, PatternMatch, PatternSpec, ResourcePattern,
    Validator,
};
pub use config::MaskingConfig;
pub use engine::{MaskingEngine, MaskingReport, UnmaskingReport};
pub use leaks::{scan_for_leaks, LeakedResource};
pub use store::{MappingEntry, MappingStats, MappingStore};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::catalog::PatternCatalog;
    pub use crate::engine::MaskingEngine;
    pub use crate::store::MappingStore;
}
