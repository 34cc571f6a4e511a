//! External client API: talks to the cluster purely over the control RPC
//! transport — this is what a process outside `hermesd` links against.
//! An existing id's home node is simply `id.node_id` (the field minted into
//! every [`crate::id::Id`] at creation); only name-keyed calls
//! (`create_tag`, `get_or_create_blob_id`) need the `hash(name) mod
//! num_nodes` routing rule, since no id exists yet to read it from.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{HermesError, Result};
use crate::id::{BlobId, TagId};
use crate::metadata::MetadataSnapshot;
use crate::rpc::routing::RoutingTable;
use crate::rpc::wire::{ControlRequest, ControlResponse};
use crate::rpc::Client as RpcClient;
use crate::trait_registry::Trait;

pub struct Client {
    routes: Arc<RoutingTable>,
    rpc: RpcClient,
}

impl Client {
    pub fn connect(config: ClientConfig) -> Self {
        let routes = Arc::new(RoutingTable::from_hosts(&config.hosts, config.port));
        let rpc = RpcClient::new(routes.clone(), Duration::from_secs(10));
        Self { routes, rpc }
    }

    fn num_nodes(&self) -> u32 {
        self.routes.export().len().max(1) as u32
    }

    async fn call(&self, node_id: u32, req: ControlRequest) -> Result<ControlResponse> {
        self.rpc.call(node_id, req).await
    }

    fn unexpected() -> HermesError {
        HermesError::InvalidArgument("unexpected control reply".into())
    }

    pub async fn create_tag(&self, name: &str, page_size: u64) -> Result<TagId> {
        let home = crate::id::hash_str(name) % self.num_nodes();
        match self.call(home, ControlRequest::CreateTag { name: name.to_string(), page_size }).await? {
            ControlResponse::TagId(id) => Ok(id),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn get_tag_id(&self, name: &str) -> Result<Option<TagId>> {
        let home = crate::id::hash_str(name) % self.num_nodes();
        match self.call(home, ControlRequest::GetTagId { name: name.to_string() }).await? {
            ControlResponse::MaybeTagId(id) => Ok(id),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn destroy_tag(&self, tag_id: TagId) -> Result<()> {
        match self.call(tag_id.node_id, ControlRequest::DestroyTag { tag_id }).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn get_or_create_blob_id(&self, tag_id: TagId, name: &str) -> Result<BlobId> {
        match self
            .call(tag_id.node_id, ControlRequest::GetOrCreateBlobId { tag_id, name: name.to_string() })
            .await?
        {
            ControlResponse::BlobId(id) => Ok(id),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn put(&self, blob_id: BlobId, offset: u64, bytes: Vec<u8>) -> Result<()> {
        match self.call(blob_id.node_id, ControlRequest::Put { blob_id, offset, bytes }).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn get(&self, blob_id: BlobId, offset: u64, len: u64) -> Result<Vec<u8>> {
        match self.call(blob_id.node_id, ControlRequest::Get { blob_id, offset, len }).await? {
            ControlResponse::Data(d) => Ok(d),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn append(&self, blob_id: BlobId, bytes: Vec<u8>) -> Result<u64> {
        match self.call(blob_id.node_id, ControlRequest::Append { blob_id, bytes }).await? {
            ControlResponse::Written(n) => Ok(n),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn destroy(&self, blob_id: BlobId) -> Result<()> {
        match self.call(blob_id.node_id, ControlRequest::Destroy { blob_id }).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn tag_blob(&self, blob_id: BlobId, tag_id: TagId) -> Result<()> {
        match self.call(blob_id.node_id, ControlRequest::TagBlob { blob_id, tag_id }).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn untag_blob(&self, blob_id: BlobId, tag_id: TagId) -> Result<()> {
        match self.call(blob_id.node_id, ControlRequest::UntagBlob { blob_id, tag_id }).await? {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    /// No-op beyond a round-trip ping: there's nothing on the wire to
    /// flush, since this node doesn't persist state past its own process
    /// lifetime; this still confirms the node is reachable.
    pub async fn flush(&self, node_id: u32) -> Result<()> {
        match self.call(node_id, ControlRequest::Ping).await? {
            ControlResponse::Pong => Ok(()),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn collect_metadata_snapshot(&self, node_id: u32) -> Result<MetadataSnapshot> {
        match self.call(node_id, ControlRequest::CollectMetadataSnapshot).await? {
            ControlResponse::Snapshot(s) => Ok(s),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }

    pub async fn register_trait(&self, tag_id: TagId, name: &str, instance: Trait) -> Result<()> {
        match self
            .call(
                tag_id.node_id,
                ControlRequest::RegisterTrait { tag_id, name: name.to_string(), instance },
            )
            .await?
        {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Err(e) => Err(HermesError::InvalidArgument(e)),
            _ => Err(Self::unexpected()),
        }
    }
}
