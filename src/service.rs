//! The explicit `Service` value: one struct holding every process-wide
//! singleton (metadata, buffers, scheduler, routing), constructed once at
//! daemon start and torn down in reverse order rather than living behind
//! free-standing statics. Also decides home-node routing: `hash(tag, name)
//! mod num_nodes` picks the node authoritative for a (tag, name) pair.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::blob_io::BlobIo;
use crate::borg::Borg;
use crate::buffer_pool::BufferPool;
use crate::config::NodeConfig;
use crate::dpe::{policy_for, Placement};
use crate::error::Result;
use crate::id::{BlobId, TagId};
use crate::metadata::MetadataManager;
use crate::rpc::routing::RoutingTable;
use crate::rpc::wire::{ControlRequest, ControlResponse};
use crate::rpc::{Client, ControlHandler};
use crate::scheduler::{blob_fingerprint, Priority, Scheduler};

pub struct Service {
    pub node_id: u32,
    pub config: NodeConfig,
    pub mdm: Arc<MetadataManager>,
    pub pool: Arc<BufferPool>,
    pub dpe: Arc<dyn Placement + Send + Sync>,
    pub scheduler: Arc<Scheduler>,
    pub routes: Arc<RoutingTable>,
    pub rpc_client: Client,
    /// Shared across every `tick_borg` call so streaming iteration actually
    /// advances through the node's blobs tick over tick, rather than
    /// rescanning the same leading batch every time.
    borg_cursor: std::sync::atomic::AtomicUsize,
    /// Set by a `ControlRequest::Shutdown` call; `hermesd`'s main loop waits
    /// on this alongside `SIGINT` so `hermes-ctl stop` can trigger the same
    /// graceful drain path.
    pub shutdown_requested: tokio::sync::Notify,
}

impl Service {
    pub fn start(config: NodeConfig) -> Result<Arc<Self>> {
        let mdm = Arc::new(MetadataManager::new(config.node_id, config.dpe.clone()));
        let pool = Arc::new(BufferPool::new(config.node_id, &config.targets)?);
        let dpe: Arc<dyn Placement + Send + Sync> = policy_for(config.dpe.policy).into();
        let scheduler = Scheduler::start(config.queue_manager.max_lanes, config.queue_manager.queue_depth);
        let routes = Arc::new(RoutingTable::from_hosts(&config.rpc.hosts, config.rpc.port));
        let rpc_client = Client::new(routes.clone(), Duration::from_secs(5));

        info!(node_id = config.node_id, targets = config.targets.len(), "service starting");
        Ok(Arc::new(Self {
            node_id: config.node_id,
            config,
            mdm,
            pool,
            dpe,
            scheduler,
            routes,
            rpc_client,
            borg_cursor: std::sync::atomic::AtomicUsize::new(0),
            shutdown_requested: tokio::sync::Notify::new(),
        }))
    }

    pub fn shutdown(&self) {
        info!(node_id = self.node_id, "service shutting down");
        self.scheduler.shutdown();
    }

    fn num_nodes(&self) -> u32 {
        self.config.rpc.hosts.len().max(1) as u32
    }

    /// `hash(tag_id, name) mod num_nodes`, used only when minting a fresh
    /// blob id; an existing id's home node is simply `id.node_id`.
    pub fn home_node_for_blob(&self, tag_id: TagId, name: &str) -> u32 {
        crate::id::hash_tag_name(tag_id, name) % self.num_nodes()
    }

    pub fn home_node_for_tag(&self, name: &str) -> u32 {
        crate::id::hash_str(name) % self.num_nodes()
    }

    fn io(&self) -> BlobIo<'_> {
        BlobIo::new(&self.mdm, &self.pool, self.dpe.as_ref())
    }

    pub async fn create_tag(&self, name: &str, page_size: u64) -> Result<TagId> {
        let home = self.home_node_for_tag(name);
        if home == self.node_id {
            return Ok(self.mdm.create_tag(name, page_size));
        }
        match self
            .rpc_client
            .call(home, ControlRequest::CreateTag { name: name.to_string(), page_size })
            .await?
        {
            ControlResponse::TagId(id) => Ok(id),
            ControlResponse::Err(e) => Err(crate::error::HermesError::InvalidArgument(e)),
            _ => Err(crate::error::HermesError::InvalidArgument("unexpected reply".into())),
        }
    }

    pub fn get_tag_id(&self, name: &str) -> Option<TagId> {
        self.mdm.get_tag_id(name)
    }

    pub fn get_or_create_blob_id(&self, tag_id: TagId, name: &str) -> BlobId {
        self.mdm.get_or_create_blob_id(tag_id, name)
    }

    /// Routes the mutation through the scheduler on the blob's fingerprint
    /// lane, so two concurrent writers to the same blob never race.
    pub fn put(&self, blob_id: BlobId, offset: u64, bytes: Vec<u8>) -> Result<()> {
        self.run_on_blob_lane(blob_id, move |io| io.write(blob_id, offset, &bytes).map(|_| ()))
    }

    pub fn append(&self, blob_id: BlobId, bytes: Vec<u8>) -> Result<u64> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.run_on_blob_lane(blob_id, move |io| {
            let r = io.append(blob_id, &bytes);
            let _ = tx.send(r.clone());
            r.map(|_| ())
        })?;
        rx.recv().map_err(|_| crate::error::HermesError::Cancelled)?
    }

    pub fn get(&self, blob_id: BlobId, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.io().read(blob_id, offset, len)
    }

    pub fn destroy(&self, blob_id: BlobId) -> Result<()> {
        self.run_on_blob_lane(blob_id, move |io| io.destroy(blob_id))
    }

    /// Submits `body` onto the scheduler's low-latency lane for
    /// `blob_fingerprint(blob_id)` and blocks for completion, giving
    /// synchronous call sites the lane-exclusion guarantee without needing
    /// their own locking. Takes `Arc` clones rather than borrowing `self` so
    /// the task closure can satisfy the scheduler's `'static` bound without
    /// any unsafe lifetime extension.
    fn run_on_blob_lane(
        &self,
        blob_id: BlobId,
        mut body: impl FnMut(&BlobIo<'_>) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mdm = self.mdm.clone();
        let pool = self.pool.clone();
        let dpe = self.dpe.clone();
        let task = move || {
            let io = BlobIo::new(&mdm, &pool, dpe.as_ref());
            let result = body(&io);
            let _ = tx.send(result.clone());
            result
        };
        self.scheduler.submit(Priority::LowLatency, blob_fingerprint(blob_id), 0, task)?;
        rx.recv().map_err(|_| crate::error::HermesError::Cancelled)?
    }

    pub fn tick_borg(&self) -> crate::borg::BorgTickStats {
        Borg::new(&self.mdm, &self.pool, self.config.borg.clone(), &self.borg_cursor).tick()
    }

    pub fn snapshot(&self) -> crate::metadata::MetadataSnapshot {
        self.mdm.snapshot()
    }
}

impl ControlHandler for Service {
    fn handle(&self, req: ControlRequest) -> ControlResponse {
        match req {
            ControlRequest::Ping => ControlResponse::Pong,
            ControlRequest::CreateTag { name, page_size } => {
                ControlResponse::TagId(self.mdm.create_tag(&name, page_size))
            }
            ControlRequest::GetTagId { name } => ControlResponse::MaybeTagId(self.mdm.get_tag_id(&name)),
            ControlRequest::DestroyTag { tag_id } => match self.mdm.destroy_tag(tag_id) {
                Ok(freed) => {
                    for buf in freed {
                        if let Some(t) = self.pool.get(buf.tgt_id) {
                            t.free(buf);
                        }
                    }
                    ControlResponse::Ok
                }
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::GetOrCreateBlobId { tag_id, name } => {
                ControlResponse::BlobId(self.mdm.get_or_create_blob_id(tag_id, &name))
            }
            ControlRequest::Put { blob_id, offset, bytes } => match self.put(blob_id, offset, bytes) {
                Ok(()) => ControlResponse::Ok,
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::Get { blob_id, offset, len } => match self.get(blob_id, offset, len) {
                Ok(data) => ControlResponse::Data(data),
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::Append { blob_id, bytes } => match self.append(blob_id, bytes) {
                Ok(n) => ControlResponse::Written(n),
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::Destroy { blob_id } => match self.destroy(blob_id) {
                Ok(()) => ControlResponse::Ok,
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::TagBlob { blob_id, tag_id } => match self.mdm.tag_blob(blob_id, tag_id) {
                Ok(()) => ControlResponse::Ok,
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::UntagBlob { blob_id, tag_id } => match self.mdm.untag_blob(blob_id, tag_id) {
                Ok(()) => ControlResponse::Ok,
                Err(e) => ControlResponse::Err(e.to_string()),
            },
            ControlRequest::CollectMetadataSnapshot => ControlResponse::Snapshot(self.mdm.snapshot()),
            ControlRequest::RegisterTrait { tag_id, name, instance } => {
                match self.mdm.register_trait(tag_id, name, instance) {
                    Ok(()) => ControlResponse::Ok,
                    Err(e) => ControlResponse::Err(e.to_string()),
                }
            }
            ControlRequest::Shutdown => {
                self.shutdown_requested.notify_one();
                ControlResponse::Ok
            }
        }
    }
}
