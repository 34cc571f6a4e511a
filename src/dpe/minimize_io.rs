//! Minimise I/O time: divisible-load water-filling.
//!
//! The underlying problem is an epigraph LP: minimise `T` subject to
//! `x_t / bandwidth_t <= T` and `sum(x_t) = B`, `0 <= x_t <= remaining_t`.
//! For this objective and constraint shape the LP has a closed-form
//! minimiser: give every target a share proportional to its bandwidth so
//! they all finish at the same time `T`, clamping any target whose
//! proportional share would exceed its remaining capacity and re-solving
//! the rest.

use std::collections::HashSet;

use crate::buffer_pool::BufferPool;
use crate::error::{HermesError, Result};
use crate::id::TargetId;

use super::round_robin::RoundRobin;
use super::{single_slab_candidate, Placement, Schema, SchemaEntry};

pub struct MinimizeIoTime;

impl Placement for MinimizeIoTime {
    fn plan(&self, pool: &BufferPool, want_bytes: u64) -> Result<Schema> {
        if let Some(entry) = single_slab_candidate(pool, want_bytes) {
            return Ok(vec![entry]);
        }

        match solve(pool, want_bytes) {
            Ok(schema) => Ok(schema),
            Err(HermesError::NoSpace(msg)) => Err(HermesError::NoSpace(msg)),
            Err(_) => RoundRobin.plan(pool, want_bytes),
        }
    }
}

fn solve(pool: &BufferPool, want_bytes: u64) -> Result<Schema> {
    let targets = pool.targets();
    let mut clamped: Vec<SchemaEntry> = Vec::new();
    let mut excluded: HashSet<TargetId> = HashSet::new();
    let mut remaining_bytes = want_bytes as f64;

    loop {
        let active: Vec<_> = targets.iter().filter(|t| !excluded.contains(&t.tgt_id)).collect();
        if active.is_empty() {
            return Err(HermesError::NoSpace(format!(
                "minimize-io-time: {remaining_bytes:.0} bytes left unplaced, no targets remain"
            )));
        }
        let total_bandwidth: f64 = active.iter().map(|t| t.bandwidth_mbps).sum();
        if total_bandwidth <= 0.0 {
            return Err(HermesError::InvalidArgument("all targets have zero bandwidth".into()));
        }

        // T = remaining_bytes / total_bandwidth; share_t = T * bandwidth_t.
        let shares: Vec<(TargetId, f64, u64)> = active
            .iter()
            .map(|t| {
                let share = remaining_bytes * t.bandwidth_mbps / total_bandwidth;
                (t.tgt_id, share, t.remaining())
            })
            .collect();

        let overflow = shares.iter().find(|(_, share, cap)| *share > *cap as f64);
        match overflow {
            Some(&(tgt_id, _, cap)) => {
                clamped.push(SchemaEntry { target_id: tgt_id, bytes: cap });
                remaining_bytes -= cap as f64;
                excluded.insert(tgt_id);
                if remaining_bytes <= 0.0 {
                    break;
                }
            }
            None => {
                for (tgt_id, share, _) in shares {
                    clamped.push(SchemaEntry { target_id: tgt_id, bytes: share.round() as u64 });
                }
                break;
            }
        }
    }

    quantise_to_exact_total(clamped, want_bytes)
}

/// Floating-point rounding can leave the schema a few bytes short of or
/// over `want_bytes`; nudge the largest entry to make the sum exact.
fn quantise_to_exact_total(mut schema: Schema, want_bytes: u64) -> Result<Schema> {
    let total: u64 = schema.iter().map(|e| e.bytes).sum();
    if total == want_bytes || schema.is_empty() {
        return Ok(schema);
    }
    let idx = schema
        .iter()
        .enumerate()
        .max_by_key(|(_, e)| e.bytes)
        .map(|(i, _)| i)
        .unwrap();
    if total > want_bytes {
        schema[idx].bytes -= total - want_bytes;
    } else {
        schema[idx].bytes += want_bytes - total;
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::target::DeviceKind;

    fn cfg(name: &str, bandwidth: f64, capacity: u64) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            kind: DeviceKind::Ram,
            path: None,
            capacity,
            bandwidth,
            latency_us: 5.0,
            slab_sizes: vec![4096, 65536, 1 << 20],
        }
    }

    #[test]
    fn prefers_higher_bandwidth_target_when_capacity_allows() {
        let pool = BufferPool::new(
            1,
            &[cfg("ram", 10000.0, 1 << 20), cfg("ssd", 1000.0, 1 << 20)],
        )
        .unwrap();
        let schema = MinimizeIoTime.plan(&pool, 512 * 1024).unwrap();
        assert_eq!(schema.len(), 1);
        let ram_id = pool.targets_by_score_desc()[0].tgt_id;
        assert_eq!(schema[0].target_id, ram_id);
    }

    #[test]
    fn spills_when_fast_target_is_too_small() {
        let pool = BufferPool::new(
            1,
            &[cfg("ram", 10000.0, 128 * 1024), cfg("ssd", 1000.0, 1 << 20)],
        )
        .unwrap();
        let schema = MinimizeIoTime.plan(&pool, 256 * 1024).unwrap();
        let total: u64 = schema.iter().map(|e| e.bytes).sum();
        assert_eq!(total, 256 * 1024);
        assert!(schema.len() >= 2);
    }
}
