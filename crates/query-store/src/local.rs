//! The local store adapter (C4): presents this instance's own store handle through the same
//! [`RemoteStub`] contract a remote stub uses, so the host manager can dispatch without a
//! local/remote branch. `find_by_key` completes synchronously under the hood (the runtime's
//! local store get never suspends) but is still wrapped in the async trait method for a uniform
//! call site.

use std::sync::Arc;

use async_trait::async_trait;
use streams_common::{config::keys, ConfigError, HostInfo, Properties, QueryError};
use streams_runtime_facade::LocalStoreHandle;

use crate::{ChannelConfig, RemoteStub, StoreType};

pub struct LocalStoreAdapter {
    reference: String,
    store_type: StoreType,
    self_host: HostInfo,
    handle: Arc<dyn LocalStoreHandle>,
}

impl LocalStoreAdapter {
    pub fn new(
        reference: impl Into<String>,
        store_type: StoreType,
        self_host: HostInfo,
        handle: Arc<dyn LocalStoreHandle>,
    ) -> Self {
        Self {
            reference: reference.into(),
            store_type,
            self_host,
            handle,
        }
    }

    /// Derives the self host from `application.server`; absent config is fatal here, since an
    /// instance that cannot name itself cannot be routed to by its peers.
    pub fn from_properties(
        reference: impl Into<String>,
        store_type: StoreType,
        properties: &Properties,
        handle: Arc<dyn LocalStoreHandle>,
    ) -> Result<Self, ConfigError> {
        let raw = properties
            .get_string(keys::APPLICATION_SERVER)
            .ok_or(ConfigError::MissingSelfEndpoint)?;
        let self_host = raw
            .parse::<HostInfo>()
            .map_err(|e| ConfigError::Invalid {
                key: keys::APPLICATION_SERVER.to_owned(),
                value: raw.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(reference, store_type, self_host, handle))
    }

    pub fn self_host(&self) -> &HostInfo {
        &self.self_host
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn is_compatible(&self, tag: StoreType) -> bool {
        self.store_type == tag
    }
}

#[async_trait]
impl RemoteStub for LocalStoreAdapter {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn is_compatible(&self, tag: StoreType) -> bool {
        self.store_type == tag
    }

    async fn configure(&self, _config: ChannelConfig) {
        // No transport to configure; the local path never leaves the process.
    }

    async fn initialize(&self) -> Result<(), QueryError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    async fn find_by_key(&self, _store_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
        self.handle.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streams_runtime_facade::fake::{FakeRuntime, ForStore};

    #[tokio::test]
    async fn local_hit_returns_value() {
        let runtime = Arc::new(FakeRuntime::new(HostInfo::new("localhost", 9099)));
        runtime.put("join-store", b"j-1", b"123".to_vec());
        let handle = Arc::new(ForStore::new(runtime.clone(), "join-store"));
        let adapter = LocalStoreAdapter::new(
            "join-store",
            StoreType::KeyValue,
            HostInfo::new("localhost", 9099),
            handle,
        );
        adapter.initialize().await.unwrap();
        let value = adapter.find_by_key("join-store", b"j-1").await.unwrap();
        assert_eq!(value, Some(b"123".to_vec()));
    }

    #[tokio::test]
    async fn local_miss_returns_none() {
        let runtime = Arc::new(FakeRuntime::new(HostInfo::new("localhost", 9099)));
        let handle = Arc::new(ForStore::new(runtime, "join-store"));
        let adapter = LocalStoreAdapter::new(
            "join-store",
            StoreType::KeyValue,
            HostInfo::new("localhost", 9099),
            handle,
        );
        let value = adapter.find_by_key("join-store", b"missing").await.unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn from_properties_requires_application_server() {
        let runtime = Arc::new(FakeRuntime::new(HostInfo::new("localhost", 9099)));
        let handle = Arc::new(ForStore::new(runtime, "join-store"));
        let props = Properties::new();
        let err = LocalStoreAdapter::from_properties("join-store", StoreType::KeyValue, &props, handle)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSelfEndpoint));
    }

    #[test]
    fn from_properties_parses_self_host() {
        let runtime = Arc::new(FakeRuntime::new(HostInfo::new("localhost", 9099)));
        let handle = Arc::new(ForStore::new(runtime, "join-store"));
        let mut props = Properties::new();
        props.set(streams_common::config::keys::APPLICATION_SERVER, "localhost:9099");
        let adapter =
            LocalStoreAdapter::from_properties("join-store", StoreType::KeyValue, &props, handle)
                .unwrap();
        assert_eq!(adapter.self_host(), &HostInfo::new("localhost", 9099));
    }
}
