//! Hermes: a multi-tiered storage buffering layer. See the module docs for
//! the metadata service, buffer pool, data placement engine, buffer
//! organiser, blob I/O path, lane scheduler, and RPC transport.

pub mod blob_io;
pub mod borg;
pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod dpe;
pub mod error;
pub mod id;
pub mod metadata;
pub mod rpc;
pub mod scheduler;
pub mod service;
pub mod target;
pub mod trait_registry;

pub use error::{HermesError, Result};
pub use id::{BlobId, TagId, TargetId};
pub use service::Service;
