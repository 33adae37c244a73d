//! Host resolution and stub lifecycle (C5). Resolves which host owns a key, and hands callers an
//! initialized [`RemoteStub`] for a `(host, store)` pair, caching one stub per host with a
//! single-flight future so concurrent callers racing on the same host share one initialization.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use streams_common::{HostInfo, QueryError};
use streams_query_store::{ChannelConfig, ChannelConfigurer, RemoteStub, StoreDescriptor, StoreType};
use streams_runtime_facade::{KeyQueryMetadata, RuntimeMetadataProvider};
use tokio::sync::Mutex;

type InitResult = Result<Arc<dyn RemoteStub>, Arc<QueryError>>;
type InitFuture = Shared<BoxFuture<'static, InitResult>>;

/// Registers the stores this instance knows about and resolves/caches stubs for them. Cheaply
/// `Clone` (every field is `Arc`-backed) so the management HTTP layer and the interactive query
/// executor can each hold their own handle onto the one shared cache.
#[derive(Clone)]
pub struct HostManager {
    self_host: HostInfo,
    metadata: Arc<dyn RuntimeMetadataProvider>,
    descriptors: Vec<Arc<dyn StoreDescriptor>>,
    local_adapters: HashMap<String, Arc<dyn RemoteStub>>,
    configurers: Vec<Arc<dyn ChannelConfigurer>>,
    cache: Arc<Mutex<HashMap<HostInfo, InitFuture>>>,
}

pub struct HostManagerBuilder {
    descriptors: Vec<Arc<dyn StoreDescriptor>>,
    local_adapters: HashMap<String, Arc<dyn RemoteStub>>,
    configurers: Vec<Arc<dyn ChannelConfigurer>>,
}

impl HostManagerBuilder {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            local_adapters: HashMap::new(),
            configurers: Vec::new(),
        }
    }

    /// Registers a store, along with this instance's already-initialized local adapter for it
    /// (used when `find_store` resolves to `self_host`, bypassing the cache entirely).
    pub fn register_store(
        &mut self,
        descriptor: Arc<dyn StoreDescriptor>,
        local_adapter: Arc<dyn RemoteStub>,
    ) -> &mut Self {
        self.local_adapters
            .insert(descriptor.reference().to_owned(), local_adapter);
        self.descriptors.push(descriptor);
        self
    }

    pub fn register_configurer(&mut self, configurer: Arc<dyn ChannelConfigurer>) -> &mut Self {
        self.configurers.push(configurer);
        self
    }

    pub fn build(self, self_host: HostInfo, metadata: Arc<dyn RuntimeMetadataProvider>) -> HostManager {
        HostManager {
            self_host,
            metadata,
            descriptors: self.descriptors,
            local_adapters: self.local_adapters,
            configurers: self.configurers,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for HostManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostManager {
    /// Resolves the host owning `key_bytes` in `store_name`. Falls back to the lowest-sorting
    /// known host when the runtime reports no authoritative owner yet (cold start or a
    /// rebalance in flight), and to `None` if no hosts are known at all.
    pub fn find_host(&self, store_name: &str, key_bytes: &[u8]) -> Option<HostInfo> {
        match self.metadata.metadata_for_key(store_name, key_bytes) {
            KeyQueryMetadata::Available { active_host, .. } => Some(active_host),
            KeyQueryMetadata::NotAvailable => {
                let mut hosts = self.metadata.known_hosts();
                hosts.sort();
                hosts.into_iter().next()
            }
        }
    }

    /// True if this instance is the current owner of `key_bytes` in `store_name`, by the same
    /// resolution `find_host` would use (including its cold-start tie-break). The inbound find
    /// handler uses this to detect a stale route: the peer resolved this host before a rebalance
    /// moved the partition away.
    pub fn is_owner(&self, store_name: &str, key_bytes: &[u8]) -> bool {
        self.find_host(store_name, key_bytes).as_ref() == Some(&self.self_host)
    }

    pub fn find_store_by_reference(&self, reference: &str) -> Option<Arc<dyn StoreDescriptor>> {
        self.descriptors
            .iter()
            .find(|d| d.reference() == reference)
            .cloned()
    }

    /// This instance's own local adapter for `reference`, used to serve an inbound remote query
    /// (the peer has already decided this host owns the key; there is no routing left to do).
    pub fn local_store(&self, reference: &str) -> Option<Arc<dyn RemoteStub>> {
        self.local_adapters.get(reference).cloned()
    }

    /// Resolves the configured store compatible with `tag`, bound to `host`. Local stores never
    /// enter the cache; remote stores are cached per host behind a single-flight future so a
    /// thundering herd of callers resolving the same freshly-seen host pay for one
    /// initialization.
    pub async fn find_store(&self, host: &HostInfo, tag: StoreType) -> Option<Arc<dyn RemoteStub>> {
        let descriptor = self.descriptors.iter().find(|d| d.is_compatible(tag))?.clone();

        if *host == self.self_host {
            return self.local_adapters.get(descriptor.reference()).cloned();
        }

        let init = {
            let mut cache = self.cache.lock().await;
            cache
                .entry(host.clone())
                .or_insert_with(|| self.spawn_init(descriptor, host.clone()))
                .clone()
        };

        match init.await {
            Ok(stub) => Some(stub),
            Err(err) => {
                tracing::warn!(%err, %host, "failed to initialize remote store stub");
                self.cache.lock().await.remove(host);
                None
            }
        }
    }

    fn spawn_init(&self, descriptor: Arc<dyn StoreDescriptor>, host: HostInfo) -> InitFuture {
        let configurers = self.configurers.clone();
        async move {
            let stub = descriptor.stub(host);
            let mut config = ChannelConfig::default();
            for configurer in &configurers {
                configurer.configure(&mut config);
            }
            stub.configure(config).await;
            stub.initialize().await.map_err(Arc::new)?;
            Ok(stub)
        }
        .boxed()
        .shared()
    }

    /// Shuts down and drops every cached remote stub. Drains the map under one lock acquisition
    /// so concurrent `find_store` calls never observe a half-drained cache, then shuts the
    /// drained stubs down without holding the lock across the awaits.
    pub async fn clean_up(&self) {
        let drained: Vec<InitFuture> = {
            let mut cache = self.cache.lock().await;
            cache.drain().map(|(_, fut)| fut).collect()
        };
        for fut in drained {
            if let Ok(stub) = fut.await {
                stub.shutdown().await;
            }
        }
    }
}
