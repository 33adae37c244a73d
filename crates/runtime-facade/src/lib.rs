//! The seam standing in for the host stream-processing runtime: partition metadata, local store
//! handles, thread control, and rebalance notifications. A real deployment implements these
//! traits over its own runtime; [`fake::FakeRuntime`] is the in-memory reference implementation
//! used by examples and the rest of this workspace's tests.

pub mod fake;

use std::collections::BTreeMap;

use async_trait::async_trait;
use streams_common::{HostInfo, QueryError};
use thiserror::Error;

/// The result of asking the runtime which host currently owns a key's partition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyQueryMetadata {
    /// The partition has not been assigned anywhere yet (transient, during startup or a
    /// rebalance).
    NotAvailable,
    Available {
        active_host: HostInfo,
        standby_hosts: Vec<HostInfo>,
        partition: i32,
    },
}

#[async_trait]
pub trait RuntimeMetadataProvider: Send + Sync {
    /// Looks up which host owns the partition for `key_bytes` in `store_name`.
    fn metadata_for_key(&self, store_name: &str, key_bytes: &[u8]) -> KeyQueryMetadata;

    /// All hosts the runtime currently knows about, used as a cold-start fallback when metadata
    /// is not yet available.
    fn known_hosts(&self) -> Vec<HostInfo>;
}

/// A read-only handle onto one instance's local, partitioned state store.
pub trait LocalStoreHandle: Send + Sync {
    /// Synchronous by contract: a local store get never suspends.
    fn get(&self, key_bytes: &[u8]) -> Result<Option<Vec<u8>>, QueryError>;
}

/// Per-partition offsets as last observed from the runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PartitionOffsets {
    pub end_offset: i64,
    pub committed_offset: i64,
}

/// A snapshot of the runtime's current thread/task/partition topology, keyed by thread name then
/// partition's owning topic-partition string (`"{topic}-{partition}"`).
#[derive(Clone, Debug, Default)]
pub struct ThreadTopology {
    pub threads: BTreeMap<String, BTreeMap<String, PartitionOffsets>>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime declined to add a thread")]
    AddRejected,
    #[error("runtime declined to remove a thread")]
    RemoveRejected,
}

#[async_trait]
pub trait ThreadTopologyProvider: Send + Sync {
    /// The current thread/task/partition topology.
    fn snapshot(&self) -> ThreadTopology;

    /// Asks the runtime to add one stream thread; returns the new thread count on success.
    async fn add_thread(&self) -> Result<usize, RuntimeError>;

    /// Asks the runtime to remove one stream thread; returns the new thread count on success.
    async fn remove_thread(&self) -> Result<usize, RuntimeError>;
}

/// Runtime lifecycle states the recovery-window manager dampens scaling decisions against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuntimeState {
    Rebalancing,
    Running,
    Error,
    PendingShutdown,
}

/// Supplies a receiver for runtime state-change notifications. Implemented separately from
/// [`RuntimeMetadataProvider`]/[`ThreadTopologyProvider`] since a deployment's notification
/// mechanism (e.g. a state-listener callback bridged into a channel) is often wired up
/// independently of the metadata and thread-control paths.
pub trait RuntimeStateWatch: Send + Sync {
    fn subscribe(&self) -> tokio::sync::watch::Receiver<RuntimeState>;
}
