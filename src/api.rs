//! Control API server
//!
//! HTTP surface consumed by the UI layer: server CRUD and lifecycle
//! operations, registry snapshots, proxy resync, and a best-effort SSE
//! event stream. Lifecycle operations are accepted (202) and run in the
//! background; their progress is visible through the registry and the
//! event stream.

use crate::error::ControlError;
use crate::events::EventBus;
use crate::lifecycle::LifecycleController;
use crate::registry::{ManagedServer, Registry, ServerDraft};
use crate::reload::ReloadCoordinator;
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

type ApiBody = BoxBody<Bytes, hyper::Error>;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body for `POST /servers/{id}/delete`
#[derive(Debug, Default, Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    purge_volume: bool,
}

/// Control API server
pub struct ApiServer {
    bind_addr: SocketAddr,
    registry: Arc<Registry>,
    controller: Arc<LifecycleController>,
    coordinator: Arc<ReloadCoordinator>,
    events: EventBus,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    pub fn new(
        bind_addr: SocketAddr,
        registry: Arc<Registry>,
        controller: Arc<LifecycleController>,
        coordinator: Arc<ReloadCoordinator>,
        events: EventBus,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            registry,
            controller,
            coordinator,
            events,
            shutdown_rx,
        }
    }

    /// Run the API server until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Control API listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let api = Arc::clone(&self);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let api = Arc::clone(&api);
                                    async move { api.handle_request(req).await }
                                });
                                if let Err(e) = AutoBuilder::new(TokioExecutor::new())
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Control API shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_request(
        self: Arc<Self>,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<ApiBody>, hyper::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(%method, %path, "API request");

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let response = match (&method, segments.as_slice()) {
            (&Method::GET, ["health"]) => Ok(json_response(StatusCode::OK, r#"{"status":"ok"}"#)),
            (&Method::GET, ["version"]) => {
                let version = serde_json::json!({ "name": PKG_NAME, "version": VERSION });
                Ok(json_response(StatusCode::OK, version.to_string()))
            }
            (&Method::GET, ["servers"]) => self.list_servers().await,
            (&Method::POST, ["servers"]) => self.create_server(req).await,
            (&Method::GET, ["servers", id]) => self.get_server(id).await,
            (&Method::POST, ["servers", id, "start"]) => {
                let id = id.to_string();
                self.server_operation(&id, Op::Start).await
            }
            (&Method::POST, ["servers", id, "stop"]) => {
                let id = id.to_string();
                self.server_operation(&id, Op::Stop).await
            }
            (&Method::POST, ["servers", id, "restart"]) => {
                let id = id.to_string();
                self.server_operation(&id, Op::Restart).await
            }
            (&Method::POST, ["servers", id, "delete"]) => {
                let id = id.to_string();
                self.delete_server(&id, req).await
            }
            (&Method::POST, ["proxy", "resync"]) => self.proxy_resync().await,
            (&Method::GET, ["proxy", "status"]) => self.proxy_status(),
            (&Method::GET, ["events"]) => Ok(self.event_stream()),
            _ => Ok(json_error(StatusCode::NOT_FOUND, "Not found")),
        };

        response.or_else(|e| {
            error!(error = %e, "API error");
            Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ))
        })
    }

    // ==================== Servers ====================

    async fn list_servers(&self) -> anyhow::Result<Response<ApiBody>> {
        let servers = self.registry.list().await;
        let body = serde_json::to_string(&ApiResponse::ok(servers))?;
        Ok(json_response(StatusCode::OK, body))
    }

    async fn get_server(&self, id: &str) -> anyhow::Result<Response<ApiBody>> {
        match self.registry.get(id).await {
            Some(server) => {
                let body = serde_json::to_string(&ApiResponse::ok(server))?;
                Ok(json_response(StatusCode::OK, body))
            }
            None => Ok(json_error(StatusCode::NOT_FOUND, "Unknown server")),
        }
    }

    async fn create_server(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> anyhow::Result<Response<ApiBody>> {
        let body = req.collect().await?.to_bytes();
        let draft: ServerDraft = match serde_json::from_slice(&body) {
            Ok(d) => d,
            Err(e) => {
                return Ok(json_error(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid JSON: {}", e),
                ))
            }
        };

        if draft.name.is_empty() || draft.name.len() > 64 {
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                "Server name must be 1-64 characters",
            ));
        }
        if !draft
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                "Server name may only contain letters, digits, '-' and '_'",
            ));
        }

        match self.controller.request_create(draft).await {
            Ok((server, _task)) => {
                info!(server = %server.name, id = %server.id, "Server creation accepted");
                let body = serde_json::to_string(&ApiResponse::ok(server))?;
                Ok(json_response(StatusCode::CREATED, body))
            }
            Err(e) => Ok(control_error_response(e)),
        }
    }

    async fn server_operation(&self, id: &str, op: Op) -> anyhow::Result<Response<ApiBody>> {
        let result = match op {
            Op::Start => self.controller.request_start(id).await,
            Op::Stop => self.controller.request_stop(id).await,
            Op::Restart => self.controller.request_restart(id).await,
        };

        match result {
            Ok(_task) => self.accepted(id).await,
            Err(e) => Ok(control_error_response(e)),
        }
    }

    async fn delete_server(
        &self,
        id: &str,
        req: Request<hyper::body::Incoming>,
    ) -> anyhow::Result<Response<ApiBody>> {
        let body = req.collect().await?.to_bytes();
        let delete_req: DeleteRequest = if body.is_empty() {
            DeleteRequest::default()
        } else {
            match serde_json::from_slice(&body) {
                Ok(d) => d,
                Err(e) => {
                    return Ok(json_error(
                        StatusCode::BAD_REQUEST,
                        format!("Invalid JSON: {}", e),
                    ))
                }
            }
        };

        match self
            .controller
            .request_delete(id, delete_req.purge_volume)
            .await
        {
            Ok(_task) => self.accepted(id).await,
            Err(e) => Ok(control_error_response(e)),
        }
    }

    /// 202 with the server's current registry row
    async fn accepted(&self, id: &str) -> anyhow::Result<Response<ApiBody>> {
        let current: Option<ManagedServer> = self.registry.get(id).await;
        let body = serde_json::to_string(&ApiResponse::ok(current))?;
        Ok(json_response(StatusCode::ACCEPTED, body))
    }

    // ==================== Proxy ====================

    async fn proxy_resync(&self) -> anyhow::Result<Response<ApiBody>> {
        match self.coordinator.force_resync().await {
            Ok(()) => {
                let body = serde_json::to_string(&ApiResponse::ok(self.coordinator.status()))?;
                Ok(json_response(StatusCode::OK, body))
            }
            Err(e) => Ok(control_error_response(e)),
        }
    }

    fn proxy_status(&self) -> anyhow::Result<Response<ApiBody>> {
        let body = serde_json::to_string(&ApiResponse::ok(self.coordinator.status()))?;
        Ok(json_response(StatusCode::OK, body))
    }

    // ==================== Event stream ====================

    /// Server-sent events: one broadcast subscription per client,
    /// best-effort delivery, lagged events are silently skipped.
    fn event_stream(&self) -> Response<ApiBody> {
        let rx = self.events.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        };
                        let frame = Frame::data(Bytes::from(format!("data: {}\n\n", json)));
                        return Some((Ok::<_, hyper::Error>(frame), rx));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "SSE client lagged, events skipped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .body(StreamBody::new(stream).boxed())
            .expect("valid response with static headers")
    }
}

enum Op {
    Start,
    Stop,
    Restart,
}

fn full(body: impl Into<Bytes>) -> ApiBody {
    Full::new(body.into()).map_err(|e| match e {}).boxed()
}

fn json_response(status: StatusCode, body: impl Into<String>) -> Response<ApiBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(body.into()))
        .expect("valid response with static headers")
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response<ApiBody> {
    let body = serde_json::json!({
        "success": false,
        "error": message.into(),
    });
    json_response(status, body.to_string())
}

fn control_error_response(e: ControlError) -> Response<ApiBody> {
    json_error(e.status_code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_shape() {
        let response = json_error(StatusCode::CONFLICT, "name taken");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_control_error_mapping() {
        let response =
            control_error_response(ControlError::OperationInProgress("srv-1".to_string()));
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = control_error_response(ControlError::UnknownServer("srv-2".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
