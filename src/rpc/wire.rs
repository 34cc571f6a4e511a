//! Wire formats: identifier encoding and the control-RPC request/response
//! pair. Control types derive only `serde`; bincode 2's serde-compatibility
//! entry points (`bincode::serde::{encode_to_vec, decode_from_slice}`)
//! handle the actual framing so no type here needs `bincode::Encode`/
//! `Decode` derives.
//!
//! Every request, including a blob's read/write payload, rides the same
//! control connection as a `ControlRequest`/`ControlResponse` pair —
//! there's no separate bulk-data wire format, since a node only ever
//! resolves buffers against its own local targets.

use serde::{Deserialize, Serialize};

use crate::id::{BlobId, TagId};
use crate::metadata::blob::BlobInfo;
use crate::metadata::MetadataSnapshot;

/// Small request/reply calls that go through the scheduler on the home node
/// and return a single reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    Ping,
    CreateTag { name: String, page_size: u64 },
    GetTagId { name: String },
    DestroyTag { tag_id: TagId },
    GetOrCreateBlobId { tag_id: TagId, name: String },
    Put { blob_id: BlobId, offset: u64, bytes: Vec<u8> },
    Get { blob_id: BlobId, offset: u64, len: u64 },
    Append { blob_id: BlobId, bytes: Vec<u8> },
    Destroy { blob_id: BlobId },
    TagBlob { blob_id: BlobId, tag_id: TagId },
    UntagBlob { blob_id: BlobId, tag_id: TagId },
    CollectMetadataSnapshot,
    RegisterTrait { tag_id: TagId, name: String, instance: crate::trait_registry::Trait },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    Pong,
    TagId(TagId),
    MaybeTagId(Option<TagId>),
    BlobId(BlobId),
    Written(u64),
    Data(Vec<u8>),
    Snapshot(MetadataSnapshot),
    Blob(BlobInfo),
    Ok,
    Err(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;

    #[test]
    fn control_roundtrips_through_bincode_serde() {
        let req = ControlRequest::Put { blob_id: Id::new(1, 2, 3), offset: 0, bytes: vec![9, 9] };
        let bytes = bincode::serde::encode_to_vec(&req, bincode::config::standard()).unwrap();
        let (back, _): (ControlRequest, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        match back {
            ControlRequest::Put { bytes, .. } => assert_eq!(bytes, vec![9, 9]),
            _ => panic!("wrong variant"),
        }
    }
}
