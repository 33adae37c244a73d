//! The reference remote transport (C3): JSON-over-HTTP. Each stub owns one `reqwest::Client`,
//! built lazily on `initialize()` rather than at construction, mirroring how the teacher's
//! connection-managed stores defer the real connection until the store is actually opened.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use streams_common::{HostInfo, QueryError};
use streams_query_store::{ChannelConfig, RemoteStub, StoreDescriptor, StoreType};
use tokio::sync::OnceCell;

const FIND_PATH: &str = "__iq/find";

#[derive(Serialize)]
struct FindRequest<'a> {
    store_name: &'a str,
    key_bytes: String,
}

#[derive(Deserialize)]
struct FindResponse {
    value: String,
}

/// Describes a store reachable over the network; `stub(host)` is the factory the host manager
/// calls to bind it to a resolved host.
pub struct HttpStoreDescriptor {
    reference: String,
    store_type: StoreType,
}

impl HttpStoreDescriptor {
    pub fn new(reference: impl Into<String>, store_type: StoreType) -> Self {
        Self {
            reference: reference.into(),
            store_type,
        }
    }
}

impl StoreDescriptor for HttpStoreDescriptor {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn is_compatible(&self, tag: StoreType) -> bool {
        self.store_type == tag
    }

    fn stub(&self, host: HostInfo) -> Arc<dyn RemoteStub> {
        Arc::new(RemoteHttpStub::new(self.reference.clone(), self.store_type, host))
    }
}

pub struct RemoteHttpStub {
    reference: String,
    store_type: StoreType,
    host: HostInfo,
    client: OnceCell<reqwest::Client>,
}

impl RemoteHttpStub {
    pub fn new(reference: impl Into<String>, store_type: StoreType, host: HostInfo) -> Self {
        Self {
            reference: reference.into(),
            store_type,
            host,
            client: OnceCell::new(),
        }
    }

    fn find_url(&self) -> String {
        format!("http://{}/{FIND_PATH}", self.host)
    }
}

#[async_trait]
impl RemoteStub for RemoteHttpStub {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn is_compatible(&self, tag: StoreType) -> bool {
        self.store_type == tag
    }

    async fn configure(&self, _config: ChannelConfig) {
        // The reference transport has nothing to configure beyond the default client; a
        // deployment-specific transport would stash TLS/auth settings here instead.
    }

    async fn initialize(&self) -> Result<(), QueryError> {
        self.client
            .get_or_try_init(|| async { reqwest::Client::builder().build() })
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&self) {
        // reqwest::Client has no explicit close; dropping it closes idle connections.
    }

    async fn find_by_key(&self, store_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
        let client = self
            .client
            .get()
            .ok_or(QueryError::NotInitialized)?;

        let body = FindRequest {
            store_name,
            key_bytes: BASE64.encode(key),
        };

        let response = client
            .post(self.find_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(host = %self.host, %e, "remote find request failed");
                QueryError::Transport(e.to_string())
            })?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            reqwest::StatusCode::CONFLICT => Err(QueryError::NotOwner),
            reqwest::StatusCode::OK => {
                let parsed: FindResponse = response
                    .json()
                    .await
                    .map_err(|e| QueryError::Deserialization(e.to_string()))?;
                let value = BASE64
                    .decode(parsed.value)
                    .map_err(|e| QueryError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            status => Err(QueryError::Transport(format!("unexpected status {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_url_uses_host_and_well_known_path() {
        let stub = RemoteHttpStub::new("join-store", StoreType::KeyValue, HostInfo::new("10.0.0.4", 9099));
        assert_eq!(stub.find_url(), "http://10.0.0.4:9099/__iq/find");
    }

    #[tokio::test]
    async fn query_before_initialize_is_rejected() {
        let stub = RemoteHttpStub::new("join-store", StoreType::KeyValue, HostInfo::new("10.0.0.4", 9099));
        let err = stub.find_by_key("join-store", b"k").await.unwrap_err();
        assert!(matches!(err, QueryError::NotInitialized));
    }

    #[test]
    fn descriptor_produces_stub_bound_to_requested_host() {
        let descriptor = HttpStoreDescriptor::new("join-store", StoreType::KeyValue);
        let stub = descriptor.stub(HostInfo::new("10.0.0.5", 9199));
        assert_eq!(stub.reference(), "join-store");
        assert!(stub.is_compatible(StoreType::KeyValue));
        assert!(!stub.is_compatible(StoreType::TimestampedKeyValue));
    }

    // Cross-instance round trip: a real `ManagementServer` serves `/__iq/find` and a
    // `RemoteHttpStub` queries it over actual HTTP, exercising both the successful lookup and the
    // stale-route rejection the server's ownership check produces.
    mod cross_instance {
        use super::*;
        use std::net::SocketAddr;
        use std::time::Duration;
        use streams_autopilot::{Autopilot, AutopilotConfig};
        use streams_host_manager::HostManagerBuilder;
        use streams_interactive_query::InteractiveQueryExecutor;
        use streams_management_http::{ManagementEndpoints, ManagementServer};
        use streams_query_store::local::LocalStoreAdapter;
        use streams_recovery_window::RecoveryWindow;
        use streams_runtime_facade::fake::{FakeRuntime, ForStore};

        fn free_addr() -> SocketAddr {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        }

        async fn spawn_server() -> (SocketAddr, Arc<FakeRuntime>, HostInfo) {
            let addr = free_addr();
            let self_host = HostInfo::new("127.0.0.1", addr.port());
            let runtime = Arc::new(FakeRuntime::new(self_host.clone()));
            runtime.assign("join-store", b"owned-key", self_host.clone());
            runtime.put("join-store", b"owned-key", b"owned-value".to_vec());
            runtime.assign("join-store", b"elsewhere-key", HostInfo::new("10.0.0.9", 9099));

            let local_adapter = Arc::new(LocalStoreAdapter::new(
                "join-store",
                StoreType::KeyValue,
                self_host.clone(),
                Arc::new(ForStore::new(runtime.clone(), "join-store")),
            ));
            let descriptor: Arc<dyn StoreDescriptor> = Arc::new(HttpStoreDescriptor::new("join-store", StoreType::KeyValue));
            let mut builder = HostManagerBuilder::new();
            builder.register_store(descriptor, local_adapter);
            let host_manager = builder.build(self_host.clone(), runtime.clone());

            let query = Arc::new(InteractiveQueryExecutor::new(
                host_manager.clone(),
                streams_serde_registry::default_registry(),
                Duration::from_millis(200),
            ));

            let window = RecoveryWindow::spawn(&*runtime, Duration::from_millis(50));
            let autopilot = Arc::new(Autopilot::new(
                AutopilotConfig {
                    desired_thread_count: 1,
                    thread_limit: 2,
                    lag_threshold: 10,
                    exclusion_pattern: None,
                    initial_delay: Duration::from_secs(1),
                    between_runs: Duration::from_secs(1),
                    generic_timeout: Duration::from_millis(200),
                },
                runtime.clone(),
                Some(window),
            ));

            let server = Arc::new(ManagementServer::new(
                query,
                autopilot,
                host_manager,
                ManagementEndpoints::from_exposure_list(""),
                Duration::from_millis(200),
            ));
            server.serve(addr).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            (addr, runtime, self_host)
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn find_by_key_round_trips_against_a_live_server() {
            let (_addr, _runtime, self_host) = spawn_server().await;
            let stub = RemoteHttpStub::new("join-store", StoreType::KeyValue, self_host);
            stub.initialize().await.unwrap();

            let found = stub.find_by_key("join-store", b"owned-key").await.unwrap();
            assert_eq!(found, Some(b"owned-value".to_vec()));
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn find_by_key_reports_not_owner_when_the_route_is_stale() {
            let (_addr, _runtime, self_host) = spawn_server().await;
            let stub = RemoteHttpStub::new("join-store", StoreType::KeyValue, self_host);
            stub.initialize().await.unwrap();

            let err = stub.find_by_key("join-store", b"elsewhere-key").await.unwrap_err();
            assert!(matches!(err, QueryError::NotOwner));
        }
    }
}
