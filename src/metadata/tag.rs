//! TagInfo: buckets grouping blobs and pluggable traits.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::id::{BlobId, TagId};
use crate::trait_registry::TraitRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag_id: TagId,
    pub name: String,
    pub blobs: HashSet<BlobId>,
    pub traits: Vec<TraitRef>,
    pub internal_size: u64,
    pub page_size: u64,
    pub owner: u32,
}

impl TagInfo {
    pub fn new(tag_id: TagId, name: String, page_size: u64, owner: u32) -> Self {
        Self {
            tag_id,
            name,
            blobs: HashSet::new(),
            traits: Vec::new(),
            internal_size: 0,
            page_size,
            owner,
        }
    }
}
