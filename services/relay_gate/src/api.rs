use crate::caller::CallerId;
use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use relay_runtime::{ExecutionRequest, ExecutionResult};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteReq {
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub metadata: Value,
}

pub async fn execute(
    State(state): State<AppState>,
    Path((adapter, tool)): Path<(String, String)>,
    caller: CallerId,
    body: Result<Json<ExecuteReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    if !(req.parameters.is_null() || req.parameters.is_object()) {
        return Err(AppError::bad_request("parameters must be an object"));
    }

    let request = ExecutionRequest::new(&adapter, &tool)
        .with_parameters(req.parameters)
        .with_caller(caller.0)
        .with_metadata(req.metadata);

    match state.pipeline.dispatch(request).await {
        ExecutionResult::Success {
            data,
            duration_ms,
            timestamp,
            ..
        } => Ok(Json(json!({
            "adapter": adapter,
            "tool": tool,
            "output": data,
            "durationMs": duration_ms,
            "timestamp": timestamp.to_rfc3339(),
        }))),
        ExecutionResult::Failure { error, timestamp, .. } => Err(AppError::from(error).at(timestamp)),
    }
}

pub async fn list_adapters(State(state): State<AppState>) -> Json<Value> {
    let adapters: Vec<Value> = state
        .pipeline
        .registry()
        .list()
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "version": d.version,
                "tools": d.tool_names(),
                "description": d.description,
                "authType": d.auth_type,
            })
        })
        .collect();
    let total = adapters.len();
    Json(json!({ "adapters": adapters, "total": total }))
}

pub async fn get_adapter(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let descriptor = state
        .pipeline
        .registry()
        .lookup(&name)
        .ok_or_else(|| AppError::not_found(&format!("adapter '{name}'")))?;

    let mut body = serde_json::to_value(descriptor.as_ref()).map_err(|e| AppError::internal(e.to_string()))?;
    if let Value::Object(map) = &mut body {
        map.insert("fingerprint".into(), json!(descriptor.fingerprint()));
        map.insert("circuit".into(), json!(state.pipeline.circuit_snapshot(&name)));
    }
    Ok(Json(body))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let adapters = state.pipeline.registry().len();
    let audit_ok = state.pipeline.audit().ping().await.is_ok();
    let healthy = audit_ok && adapters > 0;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "adapters": adapters,
            "audit": if audit_ok { "ok" } else { "unreachable" },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

pub async fn audit_report(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let report = state
        .pipeline
        .audit()
        .report()
        .await
        .map_err(|e| AppError::internal(format!("audit report: {e:#}")))?;
    serde_json::to_value(report)
        .map(Json)
        .map_err(|e| AppError::internal(e.to_string()))
}
