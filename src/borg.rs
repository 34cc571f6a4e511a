//! Buffer Organiser (BORG): the background tiering mover.
//!
//! Each tick rescores a batch of blobs and classifies them by percentile
//! against the rest of the node's blobs, promoting or demoting whichever
//! ones land in the top or bottom decile to the best- or worst-ranked
//! target, rather than using fixed access-count thresholds on a fixed set
//! of tiers.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::buffer_pool::BufferPool;
use crate::config::BorgConfig;
use crate::error::{HermesError, Result};
use crate::id::BlobId;
use crate::metadata::blob::BlobInfo;
use crate::metadata::MetadataManager;

#[derive(Debug, Default, Clone, Copy)]
pub struct BorgTickStats {
    pub scanned: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub skipped_no_capacity: usize,
    pub aborted_races: usize,
}

enum Direction {
    Promote,
    Demote,
}

pub struct Borg<'a> {
    mdm: &'a MetadataManager,
    pool: &'a BufferPool,
    config: BorgConfig,
    /// Borrowed rather than owned: the spec's "streaming iteration" needs
    /// this to advance across ticks, but each tick constructs a fresh
    /// `Borg` (it borrows the current config), so the cursor itself lives
    /// in the caller (`Service`) and outlives any one `Borg` value.
    cursor: &'a AtomicUsize,
}

impl<'a> Borg<'a> {
    pub fn new(mdm: &'a MetadataManager, pool: &'a BufferPool, config: BorgConfig, cursor: &'a AtomicUsize) -> Self {
        Self { mdm, pool, config, cursor }
    }

    /// One tick: rescore the batch against the node-wide access frequency
    /// high-water mark (writes/reads only normalise against what they knew
    /// at the time, which goes stale the moment a busier blob overtakes it),
    /// then walk the same batch (streaming, wraps around) and classify.
    pub fn tick(&self) -> BorgTickStats {
        let mut stats = BorgTickStats::default();

        let ids = self.mdm.blob_ids();
        if ids.is_empty() {
            return stats;
        }
        let batch = self.config.batch_size.min(ids.len());
        let start = self.cursor.fetch_add(batch, Ordering::Relaxed) % ids.len();
        let batch_ids: Vec<BlobId> = (0..batch).map(|i| ids[(start + i) % ids.len()]).collect();

        let now = self.mdm.now_ticks();
        let max_freq = self.mdm.current_max_access_freq();
        for &id in &batch_ids {
            let Some(record) = self.mdm.get_blob_record(id) else { continue };
            let refreshed = self.mdm.compute_score(&record, now, max_freq);
            if (refreshed - record.score).abs() > f32::EPSILON {
                let _ = self.mdm.mutate_blob(id, |b| {
                    b.score = refreshed;
                    Ok(())
                });
            }
        }

        let p90 = self.mdm.histogram.quantile(90);
        let p10 = self.mdm.histogram.quantile(10);

        for &id in &batch_ids {
            let Some(record) = self.mdm.get_blob_record(id) else { continue };
            stats.scanned += 1;

            let direction = if record.score >= p90 {
                Direction::Promote
            } else if record.score <= p10 {
                Direction::Demote
            } else {
                continue;
            };

            match self.maybe_relocate(id, &record, &direction) {
                Ok(true) => match direction {
                    Direction::Promote => stats.promoted += 1,
                    Direction::Demote => stats.demoted += 1,
                },
                Ok(false) => stats.skipped_no_capacity += 1,
                Err(HermesError::Conflict(_)) => {
                    stats.aborted_races += 1;
                    debug!(blob = %id, "borg: mod_count race, retrying next tick");
                }
                Err(e) => warn!(blob = %id, error = %e, "borg: relocation failed, requeuing"),
            }
        }
        stats
    }

    /// Returns `Ok(true)` if a relocation happened, `Ok(false)` if skipped
    /// for lack of capacity or because the blob is already well-placed.
    fn maybe_relocate(&self, blob_id: BlobId, record: &BlobInfo, direction: &Direction) -> Result<bool> {
        if record.buffers.is_empty() {
            return Ok(false);
        }
        let mut ranked = self.pool.targets_by_score_desc();
        if matches!(direction, Direction::Demote) {
            ranked.reverse();
        }
        let desired = match ranked.first() {
            Some(t) => t.clone(),
            None => return Ok(false),
        };
        if record.buffers.iter().all(|b| b.tgt_id == desired.tgt_id) {
            return Ok(false);
        }
        if desired.remaining() < record.blob_size {
            return Ok(false);
        }

        let mut data = Vec::with_capacity(record.blob_size as usize);
        for old in &record.buffers {
            let target = self
                .pool
                .get(old.tgt_id)
                .ok_or_else(|| HermesError::not_found(format!("target {}", old.tgt_id)))?;
            data.extend(target.read(*old, 0, old.size)?);
        }
        data.truncate(record.blob_size as usize);

        let new_buffers = match desired.reserve(record.blob_size.max(1)) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };
        let mut cursor = 0usize;
        for nb in &new_buffers {
            let take = (data.len() - cursor).min(nb.size as usize);
            desired.write(*nb, &data[cursor..cursor + take], 0)?;
            cursor += take;
        }

        let swap = self.mdm.mutate_blob_if_unchanged(blob_id, record.mod_count, |b| {
            b.buffers = new_buffers.clone();
            Ok(())
        });

        match swap {
            Ok(_) => {
                for old in &record.buffers {
                    if let Some(t) = self.pool.get(old.tgt_id) {
                        t.free(*old);
                    }
                }
                Ok(true)
            }
            Err(HermesError::Conflict(msg)) => {
                for nb in new_buffers {
                    desired.free(nb);
                }
                Err(HermesError::Conflict(msg))
            }
            Err(e) => {
                for nb in new_buffers {
                    desired.free(nb);
                }
                Err(e)
            }
        }
    }
}
