//! The two management HTTP endpoints (C6/C8's outer surface): a read-only state-store query and
//! manual autopilot thread control. Endpoints not named in the exposure list are never registered
//! on the router — a disabled endpoint 404s from routing, not from application logic.

use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use streams_autopilot::{Autopilot, AutopilotError};
use streams_host_manager::HostManager;
use streams_interactive_query::{InteractiveQueryExecutor, QueryRequest};
use streams_query_store::RemoteStub;

const READONLY_STATE_STORE: &str = "readonlystatestore";
const AUTOPILOT: &str = "autopilot";
const FIND_PATH: &str = "/__iq/find";

#[derive(Deserialize)]
struct FindRequest {
    store_name: String,
    key_bytes: String,
}

#[derive(Serialize)]
struct FindResponse {
    value: String,
}

/// Which management endpoints are registered, parsed from
/// `management.endpoints.web.exposure.include`.
#[derive(Clone, Debug, Default)]
pub struct ManagementEndpoints {
    readonly_state_store: bool,
    autopilot: bool,
}

impl ManagementEndpoints {
    pub fn from_exposure_list(raw: &str) -> Self {
        let enabled: HashSet<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            readonly_state_store: enabled.contains(READONLY_STATE_STORE),
            autopilot: enabled.contains(AUTOPILOT),
        }
    }
}

pub struct ManagementServer {
    query: Arc<InteractiveQueryExecutor>,
    autopilot: Arc<Autopilot>,
    host_manager: HostManager,
    endpoints: ManagementEndpoints,
    manual_timeout: Duration,
}

impl ManagementServer {
    pub fn new(
        query: Arc<InteractiveQueryExecutor>,
        autopilot: Arc<Autopilot>,
        host_manager: HostManager,
        endpoints: ManagementEndpoints,
        manual_timeout: Duration,
    ) -> Self {
        Self {
            query,
            autopilot,
            host_manager,
            endpoints,
            manual_timeout,
        }
    }

    /// Binds `addr` and serves connections on a background task until the returned handle is
    /// aborted.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(tokio::spawn(async move {
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(%err, "management-http accept failed");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let this = self.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let this = this.clone();
                        async move { Ok::<_, Infallible>(this.dispatch(req).await) }
                    });
                    if let Err(err) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        tracing::debug!(%err, "management-http connection closed");
                    }
                });
            }
        }))
    }

    async fn dispatch(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let query_params = req.uri().query().unwrap_or("").to_owned();

        // The inbound half of the remote transport: always on, independent of the management
        // exposure list, since peers address it directly via `application.server`.
        if path == FIND_PATH && method == Method::POST {
            return self.handle_find(req).await;
        }

        if self.endpoints.autopilot && path == format!("/{AUTOPILOT}") {
            return self.handle_autopilot(method).await;
        }

        if self.endpoints.readonly_state_store && method == Method::GET {
            if let Some((store_name, key)) = path.trim_start_matches('/').split_once('/') {
                if !store_name.is_empty() && !key.is_empty() {
                    return self.handle_query(store_name, key, &query_params).await;
                }
            }
        }

        not_found()
    }

    async fn handle_find(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => return text_response(StatusCode::BAD_REQUEST, err.to_string()),
        };
        let parsed: FindRequest = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(err) => return text_response(StatusCode::BAD_REQUEST, err.to_string()),
        };
        let key_bytes = match BASE64.decode(parsed.key_bytes) {
            Ok(bytes) => bytes,
            Err(err) => return text_response(StatusCode::BAD_REQUEST, err.to_string()),
        };

        if !self.host_manager.is_owner(&parsed.store_name, &key_bytes) {
            return not_owner();
        }
        let Some(store) = self.host_manager.local_store(&parsed.store_name) else {
            return not_found();
        };
        match store.find_by_key(&parsed.store_name, &key_bytes).await {
            Ok(Some(value)) => json_response(
                StatusCode::OK,
                &serde_json::to_value(FindResponse {
                    value: BASE64.encode(value),
                })
                .expect("FindResponse always serializes"),
            ),
            Ok(None) => not_found(),
            Err(err) => text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }

    async fn handle_autopilot(&self, method: Method) -> Response<Full<Bytes>> {
        let result = match method {
            Method::POST => self.autopilot.add_stream_thread(self.manual_timeout).await,
            Method::DELETE => self.autopilot.remove_stream_thread(self.manual_timeout).await,
            _ => return method_not_allowed(),
        };
        match result {
            Ok(()) => text_response(StatusCode::OK, String::new()),
            Err(err) => text_response(autopilot_error_status(&err), err.to_string()),
        }
    }

    async fn handle_query(
        &self,
        store_name: &str,
        key: &str,
        query_params: &str,
    ) -> Response<Full<Bytes>> {
        let request = QueryRequest {
            store_name: store_name.to_owned(),
            stringified_key: key.to_owned(),
            serde_name: parse_serde_param(query_params),
        };
        let body = match self.query.execute(&request).await {
            Ok(Some(bytes)) => json!({ key: String::from_utf8_lossy(&bytes) }),
            Ok(None) => json!({ key: "" }),
            Err(err) => {
                tracing::trace!(%err, "interactive query failed");
                json!({ "message": err.to_string() })
            }
        };
        json_response(StatusCode::OK, &body)
    }
}

fn autopilot_error_status(err: &AutopilotError) -> StatusCode {
    match err {
        AutopilotError::InvalidTransition { .. } => StatusCode::CONFLICT,
        AutopilotError::LockUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        AutopilotError::SchedulingRequiresWindow => StatusCode::INTERNAL_SERVER_ERROR,
        AutopilotError::RuntimeRejected(_) => StatusCode::BAD_GATEWAY,
    }
}

fn parse_serde_param(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == "serde" && !v.is_empty()).then(|| v.to_owned())
    })
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()))
        .expect("static response is well-formed")
}

/// The partition has since moved off this host (a rebalance raced the caller's routing decision).
/// `RemoteHttpStub` maps this status back to `QueryError::NotOwner` rather than a generic
/// transport failure, since the caller can usefully re-resolve and retry.
fn not_owner() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::CONFLICT)
        .body(Full::new(Bytes::new()))
        .expect("static response is well-formed")
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .body(Full::new(Bytes::new()))
        .expect("static response is well-formed")
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response is well-formed")
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response is well-formed")
}
