//! BufferPool (BPM): the per-node set of targets, with aggregate capacity
//! and bandwidth reporting used by the DPE.
//!
//! One struct owns every device on the node and reports aggregate stats
//! over an open list of [`Target`]s ranked by a continuous score, rather
//! than a fixed set of named tiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::TargetConfig;
use crate::error::Result;
use crate::id::{Id, TargetId};
use crate::target::Target;

#[derive(Debug, Default)]
pub struct BufferPoolStats {
    pub reserves: AtomicU64,
    pub frees: AtomicU64,
    pub reserve_failures: AtomicU64,
}

pub struct BufferPool {
    targets: Vec<Arc<Target>>,
    stats: BufferPoolStats,
}

impl BufferPool {
    pub fn new(node_id: u32, configs: &[TargetConfig]) -> Result<Self> {
        let mut targets = Vec::with_capacity(configs.len());
        for (i, cfg) in configs.iter().enumerate() {
            let tgt_id: TargetId = Id::new(node_id, crate::id::hash_str(&cfg.name), i as u64);
            let target = Target::new(
                tgt_id,
                cfg.name.clone(),
                cfg.kind,
                cfg.path.as_deref(),
                cfg.capacity,
                cfg.bandwidth,
                cfg.latency_us,
                cfg.slab_sizes.clone(),
            )?;
            targets.push(Arc::new(target));
        }
        let pool = Self { targets, stats: BufferPoolStats::default() };
        pool.rescore();
        Ok(pool)
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn get(&self, id: TargetId) -> Option<&Arc<Target>> {
        self.targets.iter().find(|t| t.tgt_id == id)
    }

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// `score = (bandwidth/latency) / max(bandwidth/latency)` across the
    /// node's targets. Recomputed whenever target membership or bandwidth
    /// changes.
    pub fn rescore(&self) {
        let ratios: Vec<f64> = self
            .targets
            .iter()
            .map(|t| t.bandwidth_mbps / t.latency_us.max(1e-9))
            .collect();
        let max_ratio = ratios.iter().cloned().fold(0.0_f64, f64::max).max(1e-9);
        for (t, r) in self.targets.iter().zip(ratios) {
            t.set_score((r / max_ratio) as f32);
        }
    }

    /// Targets ordered fastest (highest score) first, as round-robin
    /// placement requires.
    pub fn targets_by_score_desc(&self) -> Vec<Arc<Target>> {
        let mut v = self.targets.clone();
        v.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap());
        v
    }

    pub fn total_capacity(&self) -> u64 {
        self.targets.iter().map(|t| t.capacity).sum()
    }

    pub fn total_remaining(&self) -> u64 {
        self.targets.iter().map(|t| t.remaining()).sum()
    }

    pub fn record_reserve_ok(&self) {
        self.stats.reserves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reserve_fail(&self) {
        self.stats.reserve_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_free(&self) {
        self.stats.frees.fetch_add(1, Ordering::Relaxed);
    }
}
