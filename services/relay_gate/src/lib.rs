pub mod api;
pub mod caller;
pub mod error;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use relay_runtime::ExecutionPipeline;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Max request body size: 1 MiB
const MAX_BODY_BYTES: usize = 1_048_576;
/// Minimum request timeout; raised to fit a fully retried dispatch.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Headroom over the dispatch budget for body parsing and the response.
const REQUEST_SLACK: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ExecutionPipeline>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(pipeline: Arc<ExecutionPipeline>) -> Self {
        let request_timeout = request_timeout_for(&pipeline);
        Self {
            pipeline,
            request_timeout,
        }
    }
}

pub fn request_timeout_for(pipeline: &ExecutionPipeline) -> Duration {
    REQUEST_TIMEOUT.max(pipeline.dispatch_budget() + REQUEST_SLACK)
}

pub fn app(state: AppState) -> Router {
    let timeout = state.request_timeout;
    Router::new()
        .route("/health", get(api::health))
        .route("/api/adapters", get(api::list_adapters))
        .route("/api/adapters/:name", get(api::get_adapter))
        .route("/api/execute/:adapter/:tool", post(api::execute))
        .route("/api/audit/report", get(api::audit_report))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn(require_json_content_type))
        .with_state(state)
}

/// Middleware: reject POST/PUT/PATCH requests without application/json content-type.
async fn require_json_content_type(req: Request, next: Next) -> Response {
    let is_json = match req.method().as_str() {
        "POST" | "PUT" | "PATCH" => req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false),
        _ => true,
    };
    if !is_json {
        return error::AppError::unsupported_media_type().into_response();
    }
    next.run(req).await
}

pub mod test {
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Spawn the gateway on a random port. Returns the address and a
    /// JoinHandle that keeps the server alive until dropped.
    pub async fn spawn(state: super::AppState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let app = super::app(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, handle)
    }
}
