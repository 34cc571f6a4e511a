//! Data Placement Engine: decides which targets receive which bytes of an
//! incoming blob.

pub mod minimize_io;
pub mod round_robin;

use crate::buffer_pool::BufferPool;
use crate::error::Result;
use crate::id::TargetId;

/// One line of a placement schema: `bytes` go to `target_id`, quantised to
/// that target's slab sizes by the caller (BlobIO) when it actually reserves
/// buffers.
#[derive(Debug, Clone, Copy)]
pub struct SchemaEntry {
    pub target_id: TargetId,
    pub bytes: u64,
}

pub type Schema = Vec<SchemaEntry>;

pub trait Placement {
    /// Produces a schema whose entries' `bytes` sum to exactly `want_bytes`,
    /// or fails `NoSpace`.
    fn plan(&self, pool: &BufferPool, want_bytes: u64) -> Result<Schema>;
}

/// Fragmentation rule: if the policy's preferred (highest-score) target
/// alone can hold the whole request within a single slab, place it there
/// rather than invoking the general multi-target solve — this keeps the
/// common small-write path to one RPC. Only the top-ranked target is
/// considered: checking every target here would let the rule override the
/// policy's own tier preference (e.g. skipping a fast-but-full target in
/// favour of a slow one with room), which each policy must still control.
pub(crate) fn single_slab_candidate(pool: &BufferPool, want_bytes: u64) -> Option<SchemaEntry> {
    let best = pool.targets_by_score_desc().into_iter().next()?;
    let fits_one_slab = best.slab_sizes.iter().any(|&s| s >= want_bytes);
    if fits_one_slab && best.remaining() >= want_bytes {
        Some(SchemaEntry { target_id: best.tgt_id, bytes: want_bytes })
    } else {
        None
    }
}

pub fn policy_for(policy: crate::config::DpePolicy) -> Box<dyn Placement + Send + Sync> {
    match policy {
        crate::config::DpePolicy::RoundRobin => Box::new(round_robin::RoundRobin),
        crate::config::DpePolicy::MinimizeIoTime => Box::new(minimize_io::MinimizeIoTime),
    }
}
