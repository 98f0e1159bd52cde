//! HTTP facade for the content request bridge.
//!
//! Every endpoint translates into one or more tool calls through a
//! [`ToolInvoker`]; the facade keeps no state of its own. Successful
//! responses are `{success: true, data}`, errors `{success: false, error,
//! details?}`.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use contentreq_core::config::AzureDevOpsConfig;
use contentreq_supervisor::ToolInvoker;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod error;
pub mod routes;
pub mod workitems;

pub use error::ApiError;

/// What the health endpoint reports about the environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub has_token: bool,
    pub organization: String,
    pub project: String,
}

impl EnvironmentInfo {
    pub fn new(config: &AzureDevOpsConfig, has_token: bool) -> Self {
        Self {
            has_token,
            organization: config.organization_url.clone(),
            project: config.project.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub invoker: Arc<dyn ToolInvoker>,
    pub environment: EnvironmentInfo,
}

/// Build the router with CORS and request tracing.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/health", get(routes::health))
        .route(
            "/api/workitems",
            get(routes::list_work_items).post(routes::create_work_item),
        )
        .route("/api/workitems/{id}", get(routes::get_work_item))
        .route("/api/workitems/{id}/status", patch(routes::update_status))
        .route("/api/workitems/{id}/assign", post(routes::assign))
        .route(
            "/api/workitems/{id}/attachments",
            post(routes::upload_attachment),
        )
        .route("/api/area-paths", get(routes::area_paths))
        .route("/api/iterations", get(routes::iterations))
        .route("/api/validate-user", post(routes::validate_user))
        .route("/api/mcp", post(routes::mcp_dispatch))
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP facade listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Call a tool and turn an error result into an [`ApiError`].
pub(crate) async fn invoke(
    invoker: &dyn ToolInvoker,
    tool: &str,
    arguments: Value,
) -> Result<Value, ApiError> {
    let result = invoker.call_tool(tool, arguments).await?;
    if result.is_error() {
        return Err(ApiError::ToolFailed {
            tool: tool.to_string(),
            message: result.text_content(),
        });
    }
    Ok(result.payload())
}
