//! BlobInfo: the heart of the data model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::id::{BlobId, TagId};
use crate::target::BufferInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobInfo {
    pub blob_id: BlobId,
    pub tag_id: TagId,
    pub name: String,
    pub buffers: Vec<BufferInfo>,
    pub tags: HashSet<TagId>,
    pub blob_size: u64,
    pub max_blob_size: u64,
    pub score: f32,
    pub access_freq: u32,
    pub last_access: u64,
    pub mod_count: u64,
}

impl BlobInfo {
    pub fn new(blob_id: BlobId, tag_id: TagId, name: String) -> Self {
        let mut tags = HashSet::new();
        tags.insert(tag_id);
        Self {
            blob_id,
            tag_id,
            name,
            buffers: Vec::new(),
            tags,
            blob_size: 0,
            max_blob_size: 0,
            score: 0.0,
            access_freq: 0,
            last_access: 0,
            mod_count: 0,
        }
    }

    pub fn buffers_size(&self) -> u64 {
        self.buffers.iter().map(|b| b.size).sum()
    }

    /// `sum(buffers[i].size) >= blob_size` and `max_blob_size >= blob_size`.
    pub fn check_invariants(&self) -> bool {
        self.buffers_size() >= self.blob_size && self.max_blob_size >= self.blob_size
    }

    pub fn touch(&mut self, now_ticks: u64) {
        self.access_freq = self.access_freq.saturating_add(1);
        self.last_access = now_ticks;
    }
}
