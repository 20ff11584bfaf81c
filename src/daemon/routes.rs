//! HTTP handlers for the executor daemon.
//!
//! `/execute` always answers 200 for flow-level outcomes, good or bad;
//! only a scratch-directory failure (the daemon's own fault) answers 500.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::providers::CredentialStore;
use crate::script::{self, FlowResult, Interpreter};
use crate::trace::{ExecutionRecord, ExecutionStatus, TraceRecorder};

use super::sandbox::ModuleFile;
use super::AppState;

/// The `/execute` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub input: serde_json::Value,
    /// Provider credentials and other per-execution settings.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub flow_id: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
}

/// The `/execute` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<&'static str>,
    pub execution_id: String,
    pub executor_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ExecutionRecord>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "executorId": state.config.executor_id,
        "timestamp": Utc::now(),
        "uptime": state.started.elapsed().as_secs(),
    }))
}

/// POST /shutdown
pub async fn shutdown(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    info!("shutdown requested over http");
    let token = state.shutdown.clone();
    tokio::spawn(async move {
        // Let the response flush before the listener goes away.
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    Json(serde_json::json!({"status": "shutting down"}))
}

/// POST /execute
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let execution_id = request
        .execution_id
        .clone()
        .unwrap_or_else(new_execution_id);
    let started_at = Utc::now();
    let timer = Instant::now();
    info!(%execution_id, flow_id = ?request.flow_id, "execution received");

    let module = match ModuleFile::materialize(
        &state.config.scratch_dir,
        &execution_id,
        &request.code,
    )
    .await
    {
        Ok(module) => module,
        Err(daemon_error) => {
            error!(%execution_id, %daemon_error, "could not materialize program");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(failure_response(
                    &state,
                    &execution_id,
                    daemon_error.to_string(),
                    None,
                    None,
                )),
            );
        }
    };

    let mut recorder = TraceRecorder::new();
    let run = run_module(&state, &request, &module, &mut recorder).await;
    // Cleanup is unconditional, before the caller hears back.
    drop(module);

    let duration_ms = timer.elapsed().as_millis() as u64;
    let (status, result, error) = match &run {
        Ok((_, FlowResult::Completed(value))) => {
            (ExecutionStatus::Completed, Some(value.clone()), None)
        }
        Ok((_, FlowResult::Interrupted(marker))) => {
            (ExecutionStatus::Interrupted, Some(marker.clone()), None)
        }
        Err(execution_error) => (
            ExecutionStatus::Failed,
            None,
            Some(execution_error.to_string()),
        ),
    };
    let program_name = match &run {
        Ok((name, _)) => name.clone(),
        Err(_) => String::new(),
    };

    let record = ExecutionRecord {
        execution_id: execution_id.clone(),
        flow_id: request.flow_id.clone(),
        program: program_name,
        status,
        input: request.input.clone(),
        output: result.clone(),
        started_at,
        finished_at: Utc::now(),
        duration_ms,
        blocks: recorder.into_blocks(),
        error: error.clone(),
    };

    let response = match run {
        Ok(_) => {
            info!(%execution_id, duration_ms, "execution finished");
            ExecuteResponse {
                success: true,
                result,
                error: None,
                error_class: None,
                execution_id,
                executor_id: state.config.executor_id.clone(),
                timestamp: Utc::now(),
                trace: Some(record),
            }
        }
        Err(execution_error) => {
            info!(%execution_id, class = execution_error.class(), "execution failed");
            failure_response(
                &state,
                &execution_id,
                execution_error.to_string(),
                Some(execution_error.class()),
                Some(record),
            )
        }
    };

    (StatusCode::OK, Json(response))
}

/// Parse, link and run the materialized program.
///
/// Returns the program name alongside the result so the trace can carry
/// it even though the source only exists inside this call.
async fn run_module(
    state: &AppState,
    request: &ExecuteRequest,
    module: &ModuleFile,
    recorder: &mut TraceRecorder,
) -> Result<(String, FlowResult), ExecutionError> {
    let source = module
        .load()
        .await
        .map_err(|e| ExecutionError::Runtime(e.to_string()))?;

    let program = script::parse(&source)?;
    let name = program.name.clone();
    let linked = script::link(program, &state.providers)?;

    let credentials = CredentialStore::from_config(&request.config);
    let interpreter = Interpreter::new(&state.providers, &credentials);
    let result = interpreter.run(&linked, &request.input, recorder).await?;
    Ok((name, result))
}

fn failure_response(
    state: &AppState,
    execution_id: &str,
    error: String,
    error_class: Option<&'static str>,
    trace: Option<ExecutionRecord>,
) -> ExecuteResponse {
    ExecuteResponse {
        success: false,
        result: None,
        error: Some(error),
        error_class,
        execution_id: execution_id.to_string(),
        executor_id: state.config.executor_id.clone(),
        timestamp: Utc::now(),
        trace,
    }
}

/// Timestamp plus a random suffix, unique across concurrent requests.
pub fn new_execution_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("exec-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}
