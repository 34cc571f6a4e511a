//! MetadataManager (MDM): the per-node shard of blob/tag/target records.
//!
//! Each node owns one shard; `hash(tag_id, name) mod num_nodes` decides
//! which node is authoritative for a given (tag, name) pair (the home-node
//! routing lives in [`crate::service::Service`], which forwards to the right
//! shard over RPC before calling in here). Built on `DashMap` throughout —
//! per-entry `get_mut`, not a single `RwLock<HashMap>` — across three
//! related tables plus the blob/tag-name dedup indices.

pub mod blob;
pub mod histogram;
pub mod tag;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::DpeConfig;
use crate::error::{HermesError, Result};
use crate::id::{BlobId, IdGenerator, TagId, TargetId};
use crate::target::BufferInfo;
use blob::BlobInfo;
use histogram::ScoreHistogram;
use tag::TagInfo;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetStats {
    pub capacity: u64,
    pub remaining: u64,
    pub bandwidth_mbps: f64,
    pub score: f32,
}

/// Point-in-time, fuzzy (no cross-table consistency) snapshot returned by
/// `collect_metadata_snapshot` and BORG's polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub blobs: Vec<BlobInfo>,
    pub tags: Vec<(TagId, String, usize)>,
    pub targets: Vec<(TargetId, TargetStats)>,
}

pub struct MetadataManager {
    node_id: u32,
    blobs: DashMap<BlobId, BlobInfo>,
    tags: DashMap<TagId, TagInfo>,
    targets: DashMap<TargetId, TargetStats>,
    /// Dedup index for `GetOrCreateBlobId`: `(tag_id, name) -> blob_id`.
    blob_names: DashMap<(TagId, String), BlobId>,
    tag_names: DashMap<String, TagId>,
    id_gen: IdGenerator,
    pub histogram: ScoreHistogram,
    monotonic_ticks: AtomicU64,
    /// Running node-wide high-water mark of `access_freq`, updated on every
    /// touch; scoring normalises against this rather than paying for a full
    /// scan on every write.
    max_access_freq: AtomicU32,
    dpe: DpeConfig,
}

impl MetadataManager {
    pub fn new(node_id: u32, dpe: DpeConfig) -> Self {
        let bins = dpe.histogram_bins;
        Self {
            node_id,
            blobs: DashMap::new(),
            tags: DashMap::new(),
            targets: DashMap::new(),
            blob_names: DashMap::new(),
            tag_names: DashMap::new(),
            id_gen: IdGenerator::new(),
            histogram: ScoreHistogram::new(bins),
            monotonic_ticks: AtomicU64::new(0),
            max_access_freq: AtomicU32::new(0),
            dpe,
        }
    }

    pub fn now_ticks(&self) -> u64 {
        self.monotonic_ticks.fetch_add(1, Ordering::Relaxed)
    }

    /// Records a fresh `access_freq` observation and returns the node-wide
    /// max seen so far (including this one), for `compute_score` to
    /// normalise against.
    pub fn observe_access_freq(&self, access_freq: u32) -> u32 {
        self.max_access_freq.fetch_max(access_freq, Ordering::Relaxed).max(access_freq)
    }

    pub fn current_max_access_freq(&self) -> u32 {
        self.max_access_freq.load(Ordering::Relaxed)
    }

    // ---- tags ----------------------------------------------------------

    pub fn create_tag(&self, name: &str, page_size: u64) -> TagId {
        if let Some(existing) = self.tag_names.get(name) {
            return *existing;
        }
        let hash = crate::id::hash_str(name);
        let new_id: TagId = self.id_gen.next(self.node_id, hash);
        match self.tag_names.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(new_id);
                self.tags.insert(new_id, TagInfo::new(new_id, name.to_string(), page_size, self.node_id));
                new_id
            }
        }
    }

    pub fn get_tag_id(&self, name: &str) -> Option<TagId> {
        self.tag_names.get(name).map(|e| *e)
    }

    pub fn get_tag_record(&self, tag_id: TagId) -> Option<TagInfo> {
        self.tags.get(&tag_id).map(|e| e.clone())
    }

    /// Attaches (or replaces, if `name` is already registered on this tag) a
    /// trait instance on the named tag.
    pub fn register_trait(&self, tag_id: TagId, name: String, instance: crate::trait_registry::Trait) -> Result<()> {
        let mut tag = self
            .tags
            .get_mut(&tag_id)
            .ok_or_else(|| HermesError::not_found(format!("tag {tag_id}")))?;
        match tag.traits.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.instance = instance,
            None => tag.traits.push(crate::trait_registry::TraitRef { name, instance }),
        }
        Ok(())
    }

    /// Destroys every blob owned by the tag and returns their freed buffers
    /// so the caller can return them to their owning targets.
    pub fn destroy_tag(&self, tag_id: TagId) -> Result<Vec<BufferInfo>> {
        let tag = self
            .tags
            .remove(&tag_id)
            .ok_or_else(|| HermesError::not_found(format!("tag {tag_id}")))?
            .1;
        self.tag_names.remove(&tag.name);
        let mut freed = Vec::new();
        for blob_id in tag.blobs {
            freed.extend(self.destroy_blob(blob_id)?);
        }
        Ok(freed)
    }

    // ---- blobs -----------------------------------------------------------

    /// Deterministic within an epoch: concurrent callers racing the same
    /// `(tag, name)` converge on one id via the dashmap entry API.
    pub fn get_or_create_blob_id(&self, tag_id: TagId, name: &str) -> BlobId {
        let key = (tag_id, name.to_string());
        if let Some(existing) = self.blob_names.get(&key) {
            return *existing;
        }
        let hash = crate::id::hash_tag_name(tag_id, name);
        let candidate: BlobId = self.id_gen.next(self.node_id, hash);
        match self.blob_names.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(candidate);
                let info = BlobInfo::new(candidate, tag_id, name.to_string());
                self.blobs.insert(candidate, info);
                self.histogram.increment(0.0);
                if let Some(mut tag) = self.tags.get_mut(&tag_id) {
                    tag.blobs.insert(candidate);
                }
                candidate
            }
        }
    }

    pub fn get_blob_record(&self, blob_id: BlobId) -> Option<BlobInfo> {
        self.blobs.get(&blob_id).map(|e| e.clone())
    }

    /// Replaces the buffer list and size fields of a blob record in one
    /// locked step — the "record pointer swap" commit point every buffer
    /// and score mutation goes through. `mutate` must not panic; on `Err`
    /// the record is left untouched.
    pub fn mutate_blob<F>(&self, blob_id: BlobId, mutate: F) -> Result<BlobInfo>
    where
        F: FnOnce(&mut BlobInfo) -> Result<()>,
    {
        let mut entry = self
            .blobs
            .get_mut(&blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?;
        let old_score = entry.score;
        mutate(&mut entry)?;
        self.histogram.rebucket(old_score, entry.score);
        Ok(entry.clone())
    }

    /// `mod_count`-guarded variant used by BORG: applies `mutate` only if
    /// the record's `mod_count` still equals `expected_mod_count`, returning
    /// `Conflict` (retriable on next tick) otherwise.
    pub fn mutate_blob_if_unchanged<F>(
        &self,
        blob_id: BlobId,
        expected_mod_count: u64,
        mutate: F,
    ) -> Result<BlobInfo>
    where
        F: FnOnce(&mut BlobInfo) -> Result<()>,
    {
        let mut entry = self
            .blobs
            .get_mut(&blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?;
        if entry.mod_count != expected_mod_count {
            return Err(HermesError::Conflict(format!("blob {blob_id} mod_count race")));
        }
        let old_score = entry.score;
        mutate(&mut entry)?;
        self.histogram.rebucket(old_score, entry.score);
        Ok(entry.clone())
    }

    /// Idempotent: absent blob returns success. Returns the freed buffers so
    /// the caller can return them to their owning targets.
    pub fn destroy_blob(&self, blob_id: BlobId) -> Result<Vec<BufferInfo>> {
        let Some((_, info)) = self.blobs.remove(&blob_id) else {
            return Ok(Vec::new());
        };
        self.blob_names.remove(&(info.tag_id, info.name.clone()));
        for tag_id in &info.tags {
            if let Some(mut tag) = self.tags.get_mut(tag_id) {
                tag.blobs.remove(&blob_id);
            }
        }
        self.histogram.decrement(info.score);
        Ok(info.buffers)
    }

    /// Always acquires the blob's entry before the tag's entry (blob id <
    /// tag id by numeric ordering is not assumed; the *acquisition order*
    /// is fixed as blob-then-tag regardless of id value), avoiding the
    /// classic tag↔blob deadlock.
    pub fn tag_blob(&self, blob_id: BlobId, tag_id: TagId) -> Result<()> {
        let mut blob = self
            .blobs
            .get_mut(&blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?;
        blob.tags.insert(tag_id);
        drop(blob);
        let mut tag = self
            .tags
            .get_mut(&tag_id)
            .ok_or_else(|| HermesError::not_found(format!("tag {tag_id}")))?;
        tag.blobs.insert(blob_id);
        Ok(())
    }

    pub fn untag_blob(&self, blob_id: BlobId, tag_id: TagId) -> Result<()> {
        let mut blob = self
            .blobs
            .get_mut(&blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?;
        blob.tags.remove(&tag_id);
        drop(blob);
        if let Some(mut tag) = self.tags.get_mut(&tag_id) {
            tag.blobs.remove(&blob_id);
        }
        Ok(())
    }

    // ---- targets (stats mirror, not ownership) ---------------------------

    pub fn upsert_target_stats(&self, target_id: TargetId, stats: TargetStats) {
        self.targets.insert(target_id, stats);
    }

    // ---- polling -----------------------------------------------------------

    pub fn poll_blob_metadata(&self) -> Vec<BlobInfo> {
        self.blobs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn poll_target_metadata(&self) -> Vec<(TargetId, TargetStats)> {
        self.targets.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }

    pub fn poll_tag_metadata(&self) -> Vec<(TagId, String, usize)> {
        self.tags.iter().map(|e| (e.tag_id, e.name.clone(), e.blobs.len())).collect()
    }

    pub fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            blobs: self.poll_blob_metadata(),
            tags: self.poll_tag_metadata(),
            targets: self.poll_target_metadata(),
        }
    }

    // ---- scoring -------------------------------------------------------

    /// `score = w_f·normalised(access_freq) + w_r·exp(-Δt/τ) + w_s·size_pressure`.
    pub fn compute_score(&self, blob: &BlobInfo, now_ticks: u64, max_access_freq: u32) -> f32 {
        let normalised_freq = if max_access_freq == 0 {
            0.0
        } else {
            blob.access_freq as f32 / max_access_freq as f32
        };
        let delta_ticks = now_ticks.saturating_sub(blob.last_access) as f32;
        let recency = (-delta_ticks / self.dpe.tau_secs.max(1e-6)).exp();
        let size_pressure = if blob.max_blob_size == 0 {
            0.0
        } else {
            blob.blob_size as f32 / blob.max_blob_size as f32
        };
        self.dpe.weight_freq * normalised_freq
            + self.dpe.weight_recency * recency
            + self.dpe.weight_size * size_pressure
    }

    pub fn blob_ids(&self) -> Vec<BlobId> {
        self.blobs.iter().map(|e| *e.key()).collect()
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }
}
