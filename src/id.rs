//! Type-safe 128-bit identifiers.
//!
//! Each kind carries a zero-sized marker type as a tag, so `Id<BlobTag>`,
//! `Id<TagTag>`, and `Id<TargetTag>` cannot be mixed up at compile time even
//! though they share a representation.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Marks an [`Id`] as naming a blob.
#[derive(Debug)]
pub struct BlobTag;
/// Marks an [`Id`] as naming a tag (bucket).
#[derive(Debug)]
pub struct TagTag;
/// Marks an [`Id`] as naming a target (storage device).
#[derive(Debug)]
pub struct TargetTag;

/// A 128-bit identifier: `{node_id, hash, unique}`.
///
/// `node_id` names the home node (where the authoritative record lives);
/// `unique` is locally monotonic on that node. The null id has all fields
/// zero.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Id<Kind> {
    pub node_id: u32,
    pub hash: u32,
    pub unique: u64,
    #[serde(skip)]
    _kind: PhantomData<Kind>,
}

impl<Kind> Id<Kind> {
    pub const fn new(node_id: u32, hash: u32, unique: u64) -> Self {
        Self { node_id, hash, unique, _kind: PhantomData }
    }

    pub const fn null() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.node_id == 0 && self.hash == 0 && self.unique == 0
    }

    /// 16-byte little-endian wire encoding per the External Interfaces wire
    /// format: `(node_id, hash, unique)`.
    pub fn to_wire_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&self.node_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..16].copy_from_slice(&self.unique.to_le_bytes());
        buf
    }

    pub fn from_wire_bytes(buf: &[u8; 16]) -> Self {
        let node_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let hash = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let unique = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        Self::new(node_id, hash, unique)
    }
}

impl<Kind> Clone for Id<Kind> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Kind> Copy for Id<Kind> {}

impl<Kind> PartialEq for Id<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.hash == other.hash && self.unique == other.unique
    }
}
impl<Kind> Eq for Id<Kind> {}

impl<Kind> Hash for Id<Kind> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
        self.hash.hash(state);
        self.unique.hash(state);
    }
}

impl<Kind> fmt::Debug for Id<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}:{:08x}:{})", self.node_id, self.hash, self.unique)
    }
}

impl<Kind> fmt::Display for Id<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:08x}:{}", self.node_id, self.hash, self.unique)
    }
}

pub type BlobId = Id<BlobTag>;
pub type TagId = Id<TagTag>;
pub type TargetId = Id<TargetTag>;

/// Per-node monotonic counter used to mint the `unique` field of new ids.
///
/// One instance lives on the [`crate::service::Service`]; every
/// `GetOrCreateBlobId`/`create_tag` call on the home node draws from it.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next_unique: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next_unique: AtomicU64::new(1) }
    }

    pub fn next<Kind>(&self, node_id: u32, hash: u32) -> Id<Kind> {
        let unique = self.next_unique.fetch_add(1, Ordering::Relaxed);
        Id::new(node_id, hash, unique)
    }
}

/// FNV-1a over `(tag, name)`, used both to pick a blob's home node
/// (`hash(tag_id, name) mod num_nodes`) and to seed the `hash` field of a
/// freshly minted [`BlobId`].
pub fn hash_tag_name(tag: TagId, name: &str) -> u32 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in tag.to_wire_bytes().iter().chain(name.as_bytes()) {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h ^ (h >> 32)) as u32
}

/// FNV-1a over an id's wire bytes, used as the scheduler's lane fingerprint
/// for blob mutations.
pub fn hash_id<Kind>(id: Id<Kind>) -> u32 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in id.to_wire_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h ^ (h >> 32)) as u32
}

/// FNV-1a over a bare string, used to assign a fresh [`TagId`]'s hash field
/// and to pick its home node.
pub fn hash_str(s: &str) -> u32 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h ^ (h >> 32)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_id_is_all_zero() {
        let id: BlobId = Id::null();
        assert!(id.is_null());
    }

    #[test]
    fn wire_roundtrip() {
        let id: TagId = Id::new(7, 0xdead_beef, 42);
        let bytes = id.to_wire_bytes();
        let back: TagId = Id::from_wire_bytes(&bytes);
        assert_eq!(id, back);
    }

    #[test]
    fn generator_is_monotonic_per_node() {
        let gen = IdGenerator::new();
        let a: BlobId = gen.next(1, 0);
        let b: BlobId = gen.next(1, 0);
        assert!(b.unique > a.unique);
    }

    #[test]
    fn distinct_kinds_do_not_compare() {
        let blob: BlobId = Id::new(1, 2, 3);
        let tag: TagId = Id::new(1, 2, 3);
        // Would not compile: assert_eq!(blob, tag);
        assert_eq!(blob.node_id, tag.node_id);
    }
}
