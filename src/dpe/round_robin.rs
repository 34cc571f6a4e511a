//! Round-robin placement: fastest target first, fill and advance.

use crate::buffer_pool::BufferPool;
use crate::error::{HermesError, Result};

use super::{single_slab_candidate, Placement, Schema, SchemaEntry};

pub struct RoundRobin;

impl Placement for RoundRobin {
    fn plan(&self, pool: &BufferPool, want_bytes: u64) -> Result<Schema> {
        if let Some(entry) = single_slab_candidate(pool, want_bytes) {
            return Ok(vec![entry]);
        }

        let mut schema = Vec::new();
        let mut remaining_bytes = want_bytes;
        let targets = pool.targets_by_score_desc();
        for t in &targets {
            if remaining_bytes == 0 {
                break;
            }
            let take = remaining_bytes.min(t.remaining());
            if take > 0 {
                schema.push(SchemaEntry { target_id: t.tgt_id, bytes: take });
                remaining_bytes -= take;
            }
        }
        if remaining_bytes > 0 {
            return Err(HermesError::NoSpace(format!(
                "round-robin: {remaining_bytes} bytes left unplaced after exhausting all targets"
            )));
        }
        Ok(schema)
    }
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
    fn spills_to_second_target_when_first_is_full() {
        let pool = BufferPool::new(
            1,
            &[cfg("ram", 10000.0, 128 * 1024), cfg("ssd", 1000.0, 1 << 20)],
        )
        .unwrap();
        let schema = RoundRobin.plan(&pool, 256 * 1024).unwrap();
        let total: u64 = schema.iter().map(|e| e.bytes).sum();
        assert_eq!(total, 256 * 1024);
        assert!(schema.len() >= 2);
    }

    #[test]
    fn fails_no_space_when_capacity_exhausted() {
        let pool = BufferPool::new(1, &[cfg("ram", 10000.0, 4096)]).unwrap();
        let err = RoundRobin.plan(&pool, 1 << 20).unwrap_err();
        assert!(matches!(err, HermesError::NoSpace(_)));
    }
}
