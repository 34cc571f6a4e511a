//! BlobIO: splits blob reads/writes into buffer-sized operations against
//! targets, handling partial overwrites and blob extension.
//!
//! Resolves the buffers a request touches, does the target I/O, then
//! touches access stats and commits the updated record, all spanning an
//! arbitrary number of variably-sized buffers across targets rather than a
//! single fixed-size page.

use crate::buffer_pool::BufferPool;
use crate::dpe::Placement;
use crate::error::{HermesError, Result};
use crate::id::BlobId;
use crate::metadata::blob::BlobInfo;
use crate::metadata::MetadataManager;
use crate::target::BufferInfo;

/// One buffer's worth of overlap with a requested `(offset, len)` window.
struct Overlap {
    buffer: BufferInfo,
    /// Byte offset into the buffer where the overlap starts.
    off_in_buffer: u64,
    /// Byte offset into the caller's window where this overlap starts.
    off_in_window: u64,
    len: u64,
}

/// Buffers are laid end-to-end in allocation order to cover `[0, blob_size)`;
/// this walks that layout to find which buffers a `(offset, len)` window
/// touches and where.
fn overlaps(buffers: &[BufferInfo], offset: u64, len: u64) -> Vec<Overlap> {
    let mut out = Vec::new();
    let mut cursor = 0u64;
    let window_end = offset + len;
    for &buf in buffers {
        let buf_start = cursor;
        let buf_end = cursor + buf.size;
        cursor = buf_end;
        let lo = offset.max(buf_start);
        let hi = window_end.min(buf_end);
        if lo < hi {
            out.push(Overlap {
                buffer: buf,
                off_in_buffer: lo - buf_start,
                off_in_window: lo - offset,
                len: hi - lo,
            });
        }
    }
    out
}

pub struct BlobIo<'a> {
    pub mdm: &'a MetadataManager,
    pub pool: &'a BufferPool,
    pub dpe: &'a dyn Placement,
}

impl<'a> BlobIo<'a> {
    pub fn new(mdm: &'a MetadataManager, pool: &'a BufferPool, dpe: &'a dyn Placement) -> Self {
        Self { mdm, pool, dpe }
    }

    /// Writes `bytes` at `offset`, extending the blob (and requesting new
    /// buffers from the DPE) if the write reaches past `max_blob_size`.
    pub fn write(&self, blob_id: BlobId, offset: u64, bytes: &[u8]) -> Result<u64> {
        let write_end = offset + bytes.len() as u64;
        let record = self
            .mdm
            .get_blob_record(blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?;

        let mut new_buffers = Vec::new();
        if write_end > record.max_blob_size {
            let extra = write_end - record.max_blob_size;
            let schema = self.dpe.plan(self.pool, extra)?;
            for entry in schema {
                let target = self
                    .pool
                    .get(entry.target_id)
                    .ok_or_else(|| HermesError::not_found(format!("target {}", entry.target_id)))?;
                match target.reserve(entry.bytes) {
                    Ok(bufs) => new_buffers.extend(bufs),
                    Err(e) => {
                        for b in new_buffers.drain(..) {
                            if let Some(owner) = self.pool.get(b.tgt_id) {
                                owner.free(b);
                            }
                        }
                        return Err(e);
                    }
                }
            }
            self.pool.record_reserve_ok();
        }

        let mut all_buffers = record.buffers.clone();
        all_buffers.extend(new_buffers.iter().copied());

        let write_overlaps = overlaps(&all_buffers, offset, bytes.len() as u64);
        for ov in &write_overlaps {
            let target = self.pool.get(ov.buffer.tgt_id).ok_or_else(|| {
                HermesError::not_found(format!("target {}", ov.buffer.tgt_id))
            })?;
            let slice = &bytes[ov.off_in_window as usize..(ov.off_in_window + ov.len) as usize];
            target.read_modify_write(ov.buffer, ov.off_in_buffer, slice)?;
        }

        let now = self.mdm.now_ticks();
        let new_size = write_end.max(record.blob_size);
        let new_max_size = write_end.max(record.max_blob_size);
        let updated = self.mdm.mutate_blob(blob_id, |b| {
            b.buffers = all_buffers;
            b.blob_size = new_size;
            b.max_blob_size = new_max_size;
            b.mod_count += 1;
            b.touch(now);
            b.score = 0.0; // placeholder pre-score; replaced below once we can borrow mdm again.
            Ok(())
        })?;
        let max_freq = self.mdm.observe_access_freq(updated.access_freq);
        let score = self.mdm.compute_score(&updated, now, max_freq);
        self.mdm.mutate_blob(blob_id, |b| {
            b.score = score;
            Ok(())
        })?;
        Ok(new_size)
    }

    /// Creates the blob record (if absent) and writes `bytes` starting at
    /// offset 0, the shape `put()` needs.
    pub fn put_new(&self, blob_id: BlobId, bytes: &[u8]) -> Result<()> {
        self.write(blob_id, 0, bytes)?;
        Ok(())
    }

    pub fn append(&self, blob_id: BlobId, bytes: &[u8]) -> Result<u64> {
        let current_size = self
            .mdm
            .get_blob_record(blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?
            .blob_size;
        self.write(blob_id, current_size, bytes)
    }

    /// Reads `len` bytes starting at `offset`. `RangeInvalid` if the window
    /// starts beyond `blob_size`; a window that starts within but extends
    /// past it is clamped (zero-filled tail).
    pub fn read(&self, blob_id: BlobId, offset: u64, len: u64) -> Result<Vec<u8>> {
        let record = self
            .mdm
            .get_blob_record(blob_id)
            .ok_or_else(|| HermesError::blob_not_found(blob_id))?;
        if offset > record.blob_size {
            return Err(HermesError::RangeInvalid(format!(
                "offset {offset} beyond blob_size {}",
                record.blob_size
            )));
        }
        let clamped_len = len.min(record.blob_size - offset);
        let mut out = vec![0u8; len as usize];
        for ov in overlaps(&record.buffers, offset, clamped_len) {
            let target = self.pool.get(ov.buffer.tgt_id).ok_or_else(|| {
                HermesError::not_found(format!("target {}", ov.buffer.tgt_id))
            })?;
            let data = target.read(ov.buffer, ov.off_in_buffer, ov.len)?;
            out[ov.off_in_window as usize..(ov.off_in_window + ov.len) as usize]
                .copy_from_slice(&data);
        }

        let now = self.mdm.now_ticks();
        if let Ok(updated) = self.mdm.mutate_blob(blob_id, |b| {
            b.touch(now);
            Ok(())
        }) {
            let max_freq = self.mdm.observe_access_freq(updated.access_freq);
            let score = self.mdm.compute_score(&updated, now, max_freq);
            let _ = self.mdm.mutate_blob(blob_id, |b| {
                b.score = score;
                Ok(())
            });
        }
        Ok(out)
    }

    /// Frees every buffer of the destroyed blob back to its owning target.
    /// Idempotent: an absent blob is a no-op success.
    pub fn destroy(&self, blob_id: BlobId) -> Result<()> {
        let freed = self.mdm.destroy_blob(blob_id)?;
        for buf in freed {
            if let Some(target) = self.pool.get(buf.tgt_id) {
                target.free(buf);
                self.pool.record_free();
            }
        }
        Ok(())
    }
}

/// Used only by tests/tools that need the raw record without going through
/// a full BlobIo (e.g. asserting invariants).
pub fn check_invariants(record: &BlobInfo) -> bool {
    record.check_invariants()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DpeConfig, TargetConfig};
    use crate::dpe::round_robin::RoundRobin;
    use crate::target::DeviceKind;

    fn harness(capacity: u64) -> (MetadataManager, BufferPool) {
        let mdm = MetadataManager::new(1, DpeConfig::default());
        let pool = BufferPool::new(
            1,
            &[TargetConfig {
                name: "ram0".into(),
                kind: DeviceKind::Ram,
                path: None,
                capacity,
                bandwidth: 10000.0,
                latency_us: 5.0,
                slab_sizes: vec![4096, 65536, 1 << 20],
            }],
        )
        .unwrap();
        (mdm, pool)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (mdm, pool) = harness(1 << 20);
        let dpe = RoundRobin;
        let io = BlobIo::new(&mdm, &pool, &dpe);
        let tag = mdm.create_tag("t", 0);
        let blob = mdm.get_or_create_blob_id(tag, "a");
        let data = vec![0xABu8; 4096];
        io.put_new(blob, &data).unwrap();
        let got = io.read(blob, 0, 4096).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn destroy_then_target_remaining_restored() {
        let (mdm, pool) = harness(1 << 20);
        let dpe = RoundRobin;
        let io = BlobIo::new(&mdm, &pool, &dpe);
        let tag = mdm.create_tag("t", 0);
        let blob = mdm.get_or_create_blob_id(tag, "a");
        let before = pool.total_remaining();
        io.put_new(blob, &vec![0u8; 4096]).unwrap();
        assert!(pool.total_remaining() < before);
        io.destroy(blob).unwrap();
        assert_eq!(pool.total_remaining(), before);
    }

    #[test]
    fn append_extends_blob_size() {
        let (mdm, pool) = harness(1 << 20);
        let dpe = RoundRobin;
        let io = BlobIo::new(&mdm, &pool, &dpe);
        let tag = mdm.create_tag("t", 0);
        let blob = mdm.get_or_create_blob_id(tag, "a");
        io.put_new(blob, &vec![1u8; 1024]).unwrap();
        let new_size = io.append(blob, &vec![2u8; 1024]).unwrap();
        assert_eq!(new_size, 2048);
        let got = io.read(blob, 1024, 1024).unwrap();
        assert_eq!(got, vec![2u8; 1024]);
    }

    #[test]
    fn get_nonexistent_blob_is_not_found() {
        let (mdm, pool) = harness(1 << 20);
        let dpe = RoundRobin;
        let io = BlobIo::new(&mdm, &pool, &dpe);
        let ghost: BlobId = crate::id::Id::new(1, 2, 3);
        assert!(matches!(io.read(ghost, 0, 10), Err(HermesError::NotFound(_))));
    }
}
