//! An in-memory reference implementation of the runtime-facade traits, used by examples and by
//! the integration tests elsewhere in this workspace. Not part of the public contract — a real
//! deployment supplies its own runtime binding.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use streams_common::{HostInfo, QueryError};
use tokio::sync::watch;

use crate::{
    KeyQueryMetadata, LocalStoreHandle, PartitionOffsets, RuntimeError, RuntimeMetadataProvider,
    RuntimeState, RuntimeStateWatch, ThreadTopology, ThreadTopologyProvider,
};

pub struct FakeRuntime {
    self_host: HostInfo,
    known_hosts: Mutex<Vec<HostInfo>>,
    owners: Mutex<HashMap<(String, Vec<u8>), HostInfo>>,
    local_data: Mutex<HashMap<String, HashMap<Vec<u8>, Vec<u8>>>>,
    topology: Mutex<ThreadTopology>,
    state_tx: watch::Sender<RuntimeState>,
}

impl FakeRuntime {
    pub fn new(self_host: HostInfo) -> Self {
        let (state_tx, _) = watch::channel(RuntimeState::Running);
        Self {
            known_hosts: Mutex::new(vec![self_host.clone()]),
            self_host,
            owners: Mutex::new(HashMap::new()),
            local_data: Mutex::new(HashMap::new()),
            topology: Mutex::new(ThreadTopology::default()),
            state_tx,
        }
    }

    pub fn self_host(&self) -> &HostInfo {
        &self.self_host
    }

    pub fn add_known_host(&self, host: HostInfo) {
        self.known_hosts.lock().unwrap().push(host);
    }

    /// Assigns ownership of `(store_name, key)` to `host`, and if `host` is this instance, also
    /// makes the key locally resolvable via [`LocalStoreHandle::get`].
    pub fn assign(&self, store_name: &str, key: &[u8], host: HostInfo) {
        self.owners
            .lock()
            .unwrap()
            .insert((store_name.to_owned(), key.to_vec()), host);
    }

    /// Puts a value into this instance's local store, independent of ownership assignment (tests
    /// use `assign` to decide who should be asked, and `put` to decide what they find).
    pub fn put(&self, store_name: &str, key: &[u8], value: Vec<u8>) {
        self.local_data
            .lock()
            .unwrap()
            .entry(store_name.to_owned())
            .or_default()
            .insert(key.to_vec(), value);
    }

    pub fn set_partition_offsets(
        &self,
        thread: &str,
        topic_partition: &str,
        end_offset: i64,
        committed_offset: i64,
    ) {
        self.topology
            .lock()
            .unwrap()
            .threads
            .entry(thread.to_owned())
            .or_default()
            .insert(
                topic_partition.to_owned(),
                PartitionOffsets {
                    end_offset,
                    committed_offset,
                },
            );
    }

    pub fn remove_thread_entry(&self, thread: &str) {
        self.topology.lock().unwrap().threads.remove(thread);
    }

    pub fn set_state(&self, state: RuntimeState) {
        let _ = self.state_tx.send(state);
    }

    pub fn thread_count(&self) -> usize {
        self.topology.lock().unwrap().threads.len()
    }
}

impl RuntimeMetadataProvider for FakeRuntime {
    fn metadata_for_key(&self, store_name: &str, key_bytes: &[u8]) -> KeyQueryMetadata {
        let owners = self.owners.lock().unwrap();
        match owners.get(&(store_name.to_owned(), key_bytes.to_vec())) {
            Some(host) => KeyQueryMetadata::Available {
                active_host: host.clone(),
                standby_hosts: vec![],
                partition: 0,
            },
            None => KeyQueryMetadata::NotAvailable,
        }
    }

    fn known_hosts(&self) -> Vec<HostInfo> {
        self.known_hosts.lock().unwrap().clone()
    }
}

impl LocalStoreHandle for FakeRuntime {
    fn get(&self, key_bytes: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
        // A FakeRuntime backs exactly one store in the simplest tests; callers that need several
        // stores construct one FakeRuntime-backed handle per store name via `ForStore`.
        let data = self.local_data.lock().unwrap();
        Ok(data.values().find_map(|store| store.get(key_bytes).cloned()))
    }
}

/// A [`LocalStoreHandle`] scoped to a single store name within a shared [`FakeRuntime`].
pub struct ForStore {
    runtime: std::sync::Arc<FakeRuntime>,
    store_name: String,
}

impl ForStore {
    pub fn new(runtime: std::sync::Arc<FakeRuntime>, store_name: impl Into<String>) -> Self {
        Self {
            runtime,
            store_name: store_name.into(),
        }
    }
}

impl LocalStoreHandle for ForStore {
    fn get(&self, key_bytes: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
        let data = self.runtime.local_data.lock().unwrap();
        Ok(data
            .get(&self.store_name)
            .and_then(|store| store.get(key_bytes).cloned()))
    }
}

#[async_trait]
impl ThreadTopologyProvider for FakeRuntime {
    fn snapshot(&self) -> ThreadTopology {
        self.topology.lock().unwrap().clone()
    }

    async fn add_thread(&self) -> Result<usize, RuntimeError> {
        let mut topology = self.topology.lock().unwrap();
        let name = format!("stream-thread-{}", topology.threads.len());
        topology.threads.insert(name, BTreeMap::new());
        Ok(topology.threads.len())
    }

    async fn remove_thread(&self) -> Result<usize, RuntimeError> {
        let mut topology = self.topology.lock().unwrap();
        let victim = topology
            .threads
            .keys()
            .next_back()
            .cloned()
            .ok_or(RuntimeError::RemoveRejected)?;
        topology.threads.remove(&victim);
        Ok(topology.threads.len())
    }
}

impl RuntimeStateWatch for FakeRuntime {
    fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_remove_thread_update_topology() {
        let runtime = FakeRuntime::new(HostInfo::new("localhost", 9099));
        assert_eq!(runtime.thread_count(), 0);
        runtime.add_thread().await.unwrap();
        runtime.add_thread().await.unwrap();
        assert_eq!(runtime.thread_count(), 2);
        runtime.remove_thread().await.unwrap();
        assert_eq!(runtime.thread_count(), 1);
    }

    #[test]
    fn metadata_reflects_assignment() {
        let runtime = FakeRuntime::new(HostInfo::new("localhost", 9099));
        let other = HostInfo::new("localhost", 9199);
        runtime.assign("store", b"k", other.clone());
        match runtime.metadata_for_key("store", b"k") {
            KeyQueryMetadata::Available { active_host, .. } => assert_eq!(active_host, other),
            KeyQueryMetadata::NotAvailable => panic!("expected assignment"),
        }
        assert_eq!(
            runtime.metadata_for_key("store", b"unassigned"),
            KeyQueryMetadata::NotAvailable
        );
    }

    #[test]
    fn local_get_reads_back_puts() {
        let runtime = FakeRuntime::new(HostInfo::new("localhost", 9099));
        runtime.put("store", b"k", b"v".to_vec());
        assert_eq!(
            LocalStoreHandle::get(&runtime, b"k").unwrap(),
            Some(b"v".to_vec())
        );
    }
}
