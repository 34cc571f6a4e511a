//! Pluggable trait callbacks (prefetcher hints, etc.): modeled as a
//! tagged-variant enum dispatched by match rather than dynamic dispatch or
//! shared-library plugins. Instances are attached directly to the owning
//! tag (`MetadataManager::register_trait`) rather than kept in a separate
//! process-wide registry, so a tag's traits travel with its record.

use serde::{Deserialize, Serialize};

/// A trait instance attached to a tag via `register_trait`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Trait {
    /// Sequential-access prefetch hint: read ahead `window_bytes` past the
    /// last observed access.
    Apriori { window_bytes: u64 },
    None,
}

/// A named trait instance, as stored on a [`crate::metadata::tag::TagInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitRef {
    pub name: String,
    pub instance: Trait,
}
