//! The contract shared by local and remote store access (C3/C4): a single `RemoteStub` trait
//! that the host manager dispatches to regardless of whether the resolved host is this instance
//! or another one. The dual identity of "local vs remote" collapses into which concrete type
//! implements the trait, not a branch the caller has to take.

pub mod local;

use async_trait::async_trait;
use streams_common::QueryError;

/// The closed set of store type tags a store descriptor can advertise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreType {
    KeyValue,
    TimestampedKeyValue,
}

/// Configuration applied to a stub before `initialize()`, e.g. TLS settings or connection pool
/// sizing for the concrete transport. Left as an opaque key/value bag here since the transport
/// implementation (in `streams-remote-store`) owns the keys it understands.
#[derive(Clone, Debug, Default)]
pub struct ChannelConfig {
    pub settings: Vec<(String, String)>,
}

/// Applied to every stub the host manager creates, before `initialize()`. Lets a deployment wire
/// in cross-cutting transport concerns (auth headers, TLS) without the host manager needing to
/// know about them.
pub trait ChannelConfigurer: Send + Sync {
    fn configure(&self, config: &mut ChannelConfig);
}

/// A store's identity and compatibility, independent of which host it is bound to, plus the
/// factory for binding it to one. `stub` is cheap to call repeatedly and not itself
/// responsible for caching or initialization — the host manager owns both, so that concurrent
/// callers racing on the same host observe exactly one initialized stub.
pub trait StoreDescriptor: Send + Sync {
    fn reference(&self) -> &str;
    fn is_compatible(&self, tag: StoreType) -> bool;

    fn stub(&self, host: streams_common::HostInfo) -> std::sync::Arc<dyn RemoteStub>;
}

/// The client-side handle for a store bound to one host — either a remote stub speaking the
/// query transport, or the local adapter wrapping this instance's own store handle. A stub that
/// has not been `initialize()`d must not be queried (`QueryError::NotInitialized`); the host
/// manager is solely responsible for driving that lifecycle for stubs it creates, and treats
/// the local adapter as always-ready.
#[async_trait]
pub trait RemoteStub: Send + Sync {
    fn reference(&self) -> &str;
    fn is_compatible(&self, tag: StoreType) -> bool;

    async fn configure(&self, config: ChannelConfig);
    async fn initialize(&self) -> Result<(), QueryError>;
    async fn shutdown(&self);

    async fn find_by_key(&self, store_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, QueryError>;
}
