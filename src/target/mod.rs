//! Target: one storage device, carved into slabs.
//!
//! Capacity is tracked with a CAS loop over an `AtomicU64`; slabs are
//! handed out per size class and the `NoSpace` failure is shared by RAM
//! and file-backed targets alike.

mod slab;

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{HermesError, Result};
use crate::id::TargetId;
use slab::SlabClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Ram,
    Nvme,
    Ssd,
    Hdd,
    Pfs,
}

impl DeviceKind {
    fn is_file_backed(self) -> bool {
        !matches!(self, DeviceKind::Ram)
    }
}

/// A reservation of one slab on one target, owned by exactly one blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    pub tgt_id: TargetId,
    pub slab_index: usize,
    pub offset_in_tgt: u64,
    pub size: u64,
}

enum Backing {
    Ram(Mutex<Vec<u8>>),
    File(Mutex<File>),
}

impl Backing {
    fn new(kind: DeviceKind, path: Option<&str>, capacity: u64) -> Result<Self> {
        if kind.is_file_backed() {
            let path = path.ok_or_else(|| {
                HermesError::InvalidArgument("file-backed target requires a path".into())
            })?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|e| HermesError::Io { target: path.to_string(), detail: e.to_string() })?;
            file.set_len(capacity)
                .map_err(|e| HermesError::Io { target: path.to_string(), detail: e.to_string() })?;
            Ok(Backing::File(Mutex::new(file)))
        } else {
            Ok(Backing::Ram(Mutex::new(vec![0u8; capacity as usize])))
        }
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        match self {
            Backing::Ram(buf) => {
                let mut buf = buf.lock();
                let start = offset as usize;
                let end = start + bytes.len();
                if end > buf.len() {
                    buf.resize(end, 0);
                }
                buf[start..end].copy_from_slice(bytes);
                Ok(())
            }
            Backing::File(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))
                    .and_then(|_| file.write_all(bytes))
                    .map_err(|e| HermesError::Io { target: "file".into(), detail: e.to_string() })
            }
        }
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        match self {
            Backing::Ram(buf) => {
                let buf = buf.lock();
                let start = offset as usize;
                let end = (start + len as usize).min(buf.len());
                if start >= buf.len() {
                    return Ok(vec![0u8; len as usize]);
                }
                let mut out = buf[start..end].to_vec();
                out.resize(len as usize, 0);
                Ok(out)
            }
            Backing::File(file) => {
                let mut file = file.lock();
                let mut out = vec![0u8; len as usize];
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| HermesError::Io { target: "file".into(), detail: e.to_string() })?;
                let n = file
                    .read(&mut out)
                    .map_err(|e| HermesError::Io { target: "file".into(), detail: e.to_string() })?;
                out.truncate(n.max(0));
                out.resize(len as usize, 0);
                Ok(out)
            }
        }
    }
}

pub struct Target {
    pub tgt_id: TargetId,
    pub name: String,
    pub device_kind: DeviceKind,
    pub capacity: u64,
    pub bandwidth_mbps: f64,
    pub latency_us: f64,
    pub slab_sizes: Vec<u64>,
    remaining: AtomicU64,
    classes: Vec<SlabClass>,
    backing: Backing,
    /// One advisory lock per in-flight buffer range; entries are pruned on
    /// guard drop so the map stays bounded by current contention, not by
    /// total buffer count.
    locks: DashMap<(usize, u64), Arc<Mutex<()>>>,
    /// `score ∈ [0,1]`, set by the owning [`crate::buffer_pool::BufferPool`]
    /// relative to the fastest target in the cluster.
    score: Mutex<f32>,
}

impl Target {
    pub fn new(
        tgt_id: TargetId,
        name: String,
        device_kind: DeviceKind,
        path: Option<&str>,
        capacity: u64,
        bandwidth_mbps: f64,
        latency_us: f64,
        mut slab_sizes: Vec<u64>,
    ) -> Result<Self> {
        slab_sizes.sort_unstable();
        slab_sizes.dedup();
        if slab_sizes.is_empty() {
            return Err(HermesError::InvalidArgument("target has no slab sizes".into()));
        }
        let region_size = capacity / slab_sizes.len() as u64;
        let classes = slab_sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| SlabClass::new(size, i as u64 * region_size))
            .collect();
        let backing = Backing::new(device_kind, path, capacity)?;
        Ok(Self {
            tgt_id,
            name,
            device_kind,
            capacity,
            bandwidth_mbps,
            latency_us,
            slab_sizes,
            remaining: AtomicU64::new(capacity),
            classes,
            backing,
            locks: DashMap::new(),
            score: Mutex::new(0.0),
        })
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn score(&self) -> f32 {
        *self.score.lock()
    }

    pub fn set_score(&self, score: f32) {
        *self.score.lock() = score;
    }

    fn region_end(&self, class_idx: usize) -> u64 {
        let region_size = self.capacity / self.slab_sizes.len() as u64;
        if class_idx + 1 == self.slab_sizes.len() {
            self.capacity
        } else {
            (class_idx as u64 + 1) * region_size
        }
    }

    /// CAS loop: only decrements `remaining` if enough capacity is left,
    /// preventing concurrent over-allocation.
    fn try_claim(&self, amount: u64) -> bool {
        let mut cur = self.remaining.load(Ordering::SeqCst);
        loop {
            if cur < amount {
                return false;
            }
            match self.remaining.compare_exchange_weak(
                cur,
                cur - amount,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }

    fn release(&self, amount: u64) {
        self.remaining.fetch_add(amount, Ordering::SeqCst);
    }

    fn alloc_from_class(&self, class_idx: usize) -> Option<BufferInfo> {
        let class = &self.classes[class_idx];
        let size = class.size;
        if !self.try_claim(size) {
            return None;
        }
        match class.take(self.region_end(class_idx)) {
            Some(offset) => Some(BufferInfo {
                tgt_id: self.tgt_id,
                slab_index: class_idx,
                offset_in_tgt: offset,
                size,
            }),
            None => {
                self.release(size);
                None
            }
        }
    }

    /// `reserve(want_bytes) -> Vec<BufferInfo>`: smallest single slab that
    /// fits first, else largest-fit-first across multiple buffers. Rolls
    /// back every partial allocation on failure so callers never observe
    /// partial state.
    pub fn reserve(&self, want_bytes: u64) -> Result<Vec<BufferInfo>> {
        if want_bytes == 0 {
            return Ok(Vec::new());
        }
        if let Some(class_idx) =
            self.slab_sizes.iter().position(|&s| s >= want_bytes)
        {
            if let Some(buf) = self.alloc_from_class(class_idx) {
                return Ok(vec![buf]);
            }
        }

        let mut acquired = Vec::new();
        let mut remaining_needed = want_bytes;
        'outer: while remaining_needed > 0 {
            for class_idx in (0..self.slab_sizes.len()).rev() {
                if let Some(buf) = self.alloc_from_class(class_idx) {
                    remaining_needed = remaining_needed.saturating_sub(buf.size);
                    acquired.push(buf);
                    continue 'outer;
                }
            }
            for buf in acquired {
                self.free(buf);
            }
            return Err(HermesError::NoSpace(format!(
                "target {} out of capacity for {} bytes",
                self.name, want_bytes
            )));
        }
        Ok(acquired)
    }

    pub fn free(&self, buf: BufferInfo) {
        self.classes[buf.slab_index].give_back(buf.offset_in_tgt);
        self.release(buf.size);
    }

    /// Runs `body` while holding the advisory lock for `buf`'s range,
    /// releasing it on every path including error. The lock entry is pruned
    /// afterward if nobody else is waiting on it, so the map stays bounded
    /// by current contention rather than by total buffer count ever seen.
    fn with_buffer_lock<T>(&self, buf: BufferInfo, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let key = (buf.slab_index, buf.offset_in_tgt);
        let lock = self.locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let result = {
            let _guard = lock.lock();
            body()
        };
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) <= 2);
        result
    }

    pub fn write(&self, buf: BufferInfo, bytes: &[u8], off_in_buffer: u64) -> Result<()> {
        if off_in_buffer + bytes.len() as u64 > buf.size {
            return Err(HermesError::RangeInvalid(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                bytes.len(),
                off_in_buffer,
                buf.size
            )));
        }
        self.with_buffer_lock(buf, || {
            self.backing.write_at(buf.offset_in_tgt + off_in_buffer, bytes)
        })
    }

    pub fn read(&self, buf: BufferInfo, off_in_buffer: u64, len: u64) -> Result<Vec<u8>> {
        if off_in_buffer + len > buf.size {
            return Err(HermesError::RangeInvalid(format!(
                "read of {len} bytes at offset {off_in_buffer} exceeds buffer size {}",
                buf.size
            )));
        }
        self.with_buffer_lock(buf, || self.backing.read_at(buf.offset_in_tgt + off_in_buffer, len))
    }

    /// Read-modify-write within a single buffer; the buffer's advisory lock
    /// is the atomicity unit.
    pub fn read_modify_write(
        &self,
        buf: BufferInfo,
        off_in_buffer: u64,
        new_bytes: &[u8],
    ) -> Result<()> {
        if off_in_buffer + new_bytes.len() as u64 > buf.size {
            return Err(HermesError::RangeInvalid("rmw exceeds buffer bounds".into()));
        }
        self.with_buffer_lock(buf, || {
            self.backing.write_at(buf.offset_in_tgt + off_in_buffer, new_bytes)
        })
    }

    /// No-op for in-process scratch targets: nothing here persists past
    /// the owning process's lifetime.
    pub fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;

    fn ram_target(capacity: u64) -> Target {
        Target::new(
            Id::new(1, 0, 1),
            "ram0".into(),
            DeviceKind::Ram,
            None,
            capacity,
            10000.0,
            5.0,
            vec![4096, 64 * 1024, 1024 * 1024],
        )
        .unwrap()
    }

    #[test]
    fn reserve_prefers_smallest_fitting_slab() {
        let t = ram_target(1 << 20);
        let bufs = t.reserve(4096).unwrap();
        assert_eq!(bufs.len(), 1);
        assert_eq!(bufs[0].size, 4096);
    }

    #[test]
    fn reserve_and_free_restores_capacity() {
        let t = ram_target(1 << 20);
        let before = t.remaining();
        let bufs = t.reserve(4096).unwrap();
        assert!(t.remaining() < before);
        for b in bufs {
            t.free(b);
        }
        assert_eq!(t.remaining(), before);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let t = ram_target(1 << 20);
        let buf = t.reserve(4096).unwrap().remove(0);
        t.write(buf, b"hello", 0).unwrap();
        let out = t.read(buf, 0, 5).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn no_space_rolls_back_partial_allocations() {
        let t = ram_target(8192);
        let before = t.remaining();
        let err = t.reserve(1 << 30).unwrap_err();
        assert!(matches!(err, HermesError::NoSpace(_)));
        assert_eq!(t.remaining(), before);
    }
}
