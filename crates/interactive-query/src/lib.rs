//! Interactive query executor (C6): resolves a stringified key to a typed, routable key, finds
//! who owns it, and dispatches to whichever stub answers for that host — local or remote, the
//! caller cannot tell which.

use std::time::Duration;

use streams_common::QueryError;
use streams_host_manager::HostManager;
use streams_query_store::StoreType;
use streams_serde_registry::{SerdeError, SerdeRegistry};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub store_name: String,
    pub stringified_key: String,
    pub serde_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum IqError {
    #[error(transparent)]
    Serde(#[from] SerdeError),
    #[error("no host owns this key and none are known")]
    NoRoute,
    #[error("host manager has no initialized store for the resolved host")]
    NoStoreForHost,
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("query timed out")]
    Timeout,
}

pub struct InteractiveQueryExecutor {
    host_manager: HostManager,
    serdes: SerdeRegistry,
    generic_timeout: Duration,
}

impl InteractiveQueryExecutor {
    pub fn new(host_manager: HostManager, serdes: SerdeRegistry, generic_timeout: Duration) -> Self {
        Self {
            host_manager,
            serdes,
            generic_timeout,
        }
    }

    pub async fn execute(&self, request: &QueryRequest) -> Result<Option<Vec<u8>>, IqError> {
        let serde = self.serdes.resolve(request.serde_name.as_deref())?;
        let typed_key = serde.parse(&request.stringified_key)?;
        let key_bytes = serde.to_bytes(&typed_key);

        let host = self
            .host_manager
            .find_host(&request.store_name, &key_bytes)
            .ok_or(IqError::NoRoute)?;

        let store = self
            .host_manager
            .find_store(&host, StoreType::KeyValue)
            .await
            .ok_or(IqError::NoStoreForHost)?;

        match tokio::time::timeout(
            self.generic_timeout,
            store.find_by_key(&request.store_name, &key_bytes),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_elapsed) => Err(IqError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use streams_common::HostInfo;
    use streams_host_manager::HostManagerBuilder;
    use streams_query_store::{ChannelConfig, RemoteStub, StoreDescriptor};
    use streams_runtime_facade::fake::FakeRuntime;

    struct StubStore {
        reference: String,
        value: Option<Vec<u8>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RemoteStub for StubStore {
        fn reference(&self) -> &str {
            &self.reference
        }
        fn is_compatible(&self, tag: StoreType) -> bool {
            tag == StoreType::KeyValue
        }
        async fn configure(&self, _config: ChannelConfig) {}
        async fn initialize(&self) -> Result<(), QueryError> {
            Ok(())
        }
        async fn shutdown(&self) {}
        async fn find_by_key(&self, _store_name: &str, _key: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.value.clone())
        }
    }

    struct StubDescriptor {
        reference: String,
        value: Option<Vec<u8>>,
        delay: Option<Duration>,
    }

    impl StoreDescriptor for StubDescriptor {
        fn reference(&self) -> &str {
            &self.reference
        }
        fn is_compatible(&self, tag: StoreType) -> bool {
            tag == StoreType::KeyValue
        }
        fn stub(&self, _host: HostInfo) -> Arc<dyn RemoteStub> {
            Arc::new(StubStore {
                reference: self.reference.clone(),
                value: self.value.clone(),
                delay: self.delay,
            })
        }
    }

    fn executor(
        self_host: HostInfo,
        value: Option<Vec<u8>>,
        delay: Option<Duration>,
        owner: Option<HostInfo>,
    ) -> InteractiveQueryExecutor {
        let runtime = Arc::new(FakeRuntime::new(self_host.clone()));
        if let Some(owner) = &owner {
            runtime.assign("join-store", b"j-1", owner.clone());
        }
        let descriptor: Arc<dyn StoreDescriptor> = Arc::new(StubDescriptor {
            reference: "join-store".to_owned(),
            value: value.clone(),
            delay,
        });
        let local_adapter: Arc<dyn RemoteStub> = Arc::new(StubStore {
            reference: "join-store".to_owned(),
            value,
            delay,
        });
        let mut builder = HostManagerBuilder::new();
        builder.register_store(descriptor, local_adapter);
        let host_manager = builder.build(self_host, runtime);
        InteractiveQueryExecutor::new(
            host_manager,
            streams_serde_registry::default_registry(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn resolves_and_finds_value() {
        let self_host = HostInfo::new("localhost", 9099);
        let exec = executor(self_host.clone(), Some(b"123".to_vec()), None, Some(self_host));
        let result = exec
            .execute(&QueryRequest {
                store_name: "join-store".to_owned(),
                stringified_key: "j-1".to_owned(),
                serde_name: None,
            })
            .await
            .unwrap();
        assert_eq!(result, Some(b"123".to_vec()));
    }

    #[tokio::test]
    async fn unknown_serde_name_is_reported() {
        let self_host = HostInfo::new("localhost", 9099);
        let exec = executor(self_host.clone(), Some(b"123".to_vec()), None, Some(self_host));
        let err = exec
            .execute(&QueryRequest {
                store_name: "join-store".to_owned(),
                stringified_key: "j-1".to_owned(),
                serde_name: Some("nope".to_owned()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IqError::Serde(SerdeError::UnknownSerde(_))));
    }

    #[tokio::test]
    async fn no_store_for_host_when_no_descriptor_registered() {
        let self_host = HostInfo::new("localhost", 9099);
        let runtime = Arc::new(FakeRuntime::new(self_host.clone()));
        runtime.assign("join-store", b"j-1", self_host.clone());
        let host_manager = HostManagerBuilder::new().build(self_host, runtime);
        let exec = InteractiveQueryExecutor::new(
            host_manager,
            streams_serde_registry::default_registry(),
            Duration::from_millis(200),
        );
        let err = exec
            .execute(&QueryRequest {
                store_name: "join-store".to_owned(),
                stringified_key: "j-1".to_owned(),
                serde_name: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IqError::NoStoreForHost));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let self_host = HostInfo::new("localhost", 9099);
        let exec = executor(
            self_host.clone(),
            Some(b"123".to_vec()),
            Some(Duration::from_millis(500)),
            Some(self_host),
        );
        let err = exec
            .execute(&QueryRequest {
                store_name: "join-store".to_owned(),
                stringified_key: "j-1".to_owned(),
                serde_name: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IqError::Timeout));
    }
}
