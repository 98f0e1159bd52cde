//! Endpoint handlers.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use contentreq_core::mapping::StatusFilter;
use contentreq_mcp::{Tool, SERVER_NAME};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::ApiError;
use crate::workitems::{self, filter_by_status, paginate, stats, DEFAULT_PAGE_SIZE};
use crate::{invoke, ApiState};

type ApiResult = Result<Json<Value>, ApiError>;

fn success(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

async fn call(state: &ApiState, tool: Tool, arguments: Value) -> ApiResult {
    debug!(tool = tool.name(), "Forwarding request");
    let payload = invoke(state.invoker.as_ref(), tool.name(), arguments).await?;
    Ok(success(payload))
}

fn object_body(body: Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>, ApiError> {
    let Json(value) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::BadRequest(
            "request body must be a JSON object".to_string(),
        )),
    }
}

fn work_item_id(path: Result<Path<u64>, PathRejection>) -> Result<u64, ApiError> {
    let Path(id) = path.map_err(|_| {
        ApiError::BadRequest("work item id must be a positive number".to_string())
    })?;
    Ok(id)
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    let bridge = state.invoker.status();
    let status = if bridge.state.is_serving() {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({
        "success": true,
        "status": status,
        "timestamp": Utc::now().to_rfc3339(),
        "server": "running",
        "mcp": {
            "status": bridge.state,
            "processId": bridge.process_id,
            "lastError": bridge.last_error,
        },
        "environment": state.environment,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemsQuery {
    user_email: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
    status: Option<String>,
}

pub async fn list_work_items(
    State(state): State<ApiState>,
    params: Result<Query<WorkItemsQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let email = params
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ApiError::BadRequest("userEmail query parameter is required".to_string()))?;
    let status = params.status.as_deref().unwrap_or("all");
    let filter: StatusFilter = status.parse().map_err(ApiError::BadRequest)?;

    let assigned = workitems::assigned_to(state.invoker.as_ref(), email).await?;
    let filtered = filter_by_status(assigned.items, filter);
    let stats = stats(&filtered);
    let (page, pagination) = paginate(
        filtered,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    );

    let mut data = json!({
        "userEmail": email,
        "workItems": page,
        "pagination": pagination,
        "stats": stats,
        "filter": status,
    });
    if assigned.fallback {
        data["fallback"] = json!(true);
    }
    Ok(success(data))
}

pub async fn create_work_item(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let arguments = object_body(body)?;
    call(&state, Tool::CreateContentRequest, Value::Object(arguments)).await
}

pub async fn get_work_item(
    State(state): State<ApiState>,
    id: Result<Path<u64>, PathRejection>,
) -> ApiResult {
    let id = work_item_id(id)?;
    call(&state, Tool::GetRequestDetails, json!({ "workItemId": id })).await
}

async fn call_for_work_item(
    state: &ApiState,
    tool: Tool,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let id = work_item_id(id)?;
    let mut arguments = object_body(body)?;
    arguments.insert("workItemId".to_string(), json!(id));
    call(state, tool, Value::Object(arguments)).await
}

pub async fn update_status(
    State(state): State<ApiState>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    call_for_work_item(&state, Tool::UpdateRequestStatus, id, body).await
}

pub async fn assign(
    State(state): State<ApiState>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    call_for_work_item(&state, Tool::AssignContentDeveloper, id, body).await
}

pub async fn upload_attachment(
    State(state): State<ApiState>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    call_for_work_item(&state, Tool::UploadAttachment, id, body).await
}

#[derive(Debug, Deserialize)]
pub struct AreaPathsQuery {
    depth: Option<u32>,
}

pub async fn area_paths(
    State(state): State<ApiState>,
    params: Result<Query<AreaPathsQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let mut arguments = Map::new();
    if let Some(depth) = params.depth {
        arguments.insert("depth".to_string(), json!(depth));
    }
    call(&state, Tool::GetAreaPaths, Value::Object(arguments)).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationsQuery {
    team_name: Option<String>,
    include_current_and_future: Option<bool>,
}

pub async fn iterations(
    State(state): State<ApiState>,
    params: Result<Query<IterationsQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let mut arguments = Map::new();
    if let Some(team) = params.team_name {
        arguments.insert("teamName".to_string(), json!(team));
    }
    if let Some(include) = params.include_current_and_future {
        arguments.insert("includeCurrentAndFuture".to_string(), json!(include));
    }
    call(&state, Tool::GetIterations, Value::Object(arguments)).await
}

pub async fn validate_user(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let arguments = object_body(body)?;
    call(&state, Tool::ValidateUser, Value::Object(arguments)).await
}

#[derive(Debug, Deserialize)]
pub struct McpDispatch {
    server_name: String,
    tool_name: String,
    #[serde(default)]
    arguments: Value,
}

/// Generic dispatch to any tool by name.
pub async fn mcp_dispatch(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let body = object_body(body)?;
    let request: McpDispatch = serde_json::from_value(Value::Object(body))
        .map_err(|e| ApiError::BadRequest(format!("invalid dispatch request: {}", e)))?;
    if request.server_name != SERVER_NAME {
        return Err(ApiError::BadRequest(format!(
            "Unknown MCP server: {}",
            request.server_name
        )));
    }
    let arguments = match request.arguments {
        Value::Null => json!({}),
        other => other,
    };
    let payload = invoke(state.invoker.as_ref(), &request.tool_name, arguments).await?;
    Ok(success(payload))
}

pub async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("No route for {}", uri.path()),
        })),
    )
        .into_response()
}
