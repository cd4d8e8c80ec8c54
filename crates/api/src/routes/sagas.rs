//! Saga lifecycle endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use common::SagaId;
use domain::{
    CompensationConfig, DataMap, Saga, SagaBuilder, SagaStatus, Step, StepConfig, StepType,
};
use engine::CreateSagaOptions;
use saga_store::{PageRequest, SagaStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateSagaRequest {
    pub name: String,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub input_data: DataMap,
    #[serde(default)]
    pub steps: Vec<StepRequest>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub priority: Option<i32>,
    #[serde(default)]
    pub metadata: DataMap,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Start executing right away; defaults to true.
    pub auto_start: Option<bool>,
}

#[derive(Deserialize)]
pub struct StepRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: StepConfig,
    pub compensation: Option<CompensationConfig>,
    #[serde(default)]
    pub input_data: DataMap,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub required: Option<bool>,
    pub compensatable: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: String,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub name: String,
    pub correlation_id: Option<String>,
    pub status: String,
    pub current_step_index: usize,
    pub steps: Vec<StepResponse>,
    pub input_data: DataMap,
    pub output_data: DataMap,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub priority: i32,
    pub version: i64,
    pub error_message: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct StepResponse {
    pub step_id: String,
    pub name: String,
    pub order: usize,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub required: bool,
    pub compensatable: bool,
    pub output_data: DataMap,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[derive(Serialize)]
pub struct SagaPageResponse {
    pub items: Vec<SagaResponse>,
    pub page: usize,
    pub size: usize,
    pub total: u64,
}

impl From<Saga> for SagaResponse {
    fn from(saga: Saga) -> Self {
        Self {
            saga_id: saga.saga_id.to_string(),
            name: saga.name,
            correlation_id: saga.correlation_id,
            status: saga.status.to_string(),
            current_step_index: saga.current_step_index,
            steps: saga.steps.into_iter().map(StepResponse::from).collect(),
            input_data: saga.input_data,
            output_data: saga.output_data,
            retry_count: saga.retry_count,
            max_retries: saga.max_retries,
            timeout_ms: saga.timeout_ms,
            priority: saga.priority,
            version: saga.version.as_i64(),
            error_message: saga.error_message,
            tags: saga.tags,
            created_at: saga.created_at,
            updated_at: saga.updated_at,
            started_at: saga.started_at,
            completed_at: saga.completed_at,
        }
    }
}

impl From<Step> for StepResponse {
    fn from(step: Step) -> Self {
        Self {
            step_id: step.step_id.to_string(),
            name: step.name,
            order: step.order,
            step_type: step.step_type.to_string(),
            status: step.status.to_string(),
            retry_count: step.retry_count,
            max_retries: step.max_retries,
            required: step.required,
            compensatable: step.compensatable,
            output_data: step.output_data,
            error_message: step.error_message,
            started_at: step.started_at,
            completed_at: step.completed_at,
            duration_ms: step.duration_ms,
        }
    }
}

fn parse_saga_id(raw: &str) -> Result<SagaId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(SagaId::from_uuid)
        .map_err(|e| ApiError::bad_request(format!("invalid saga id: {e}")))
}

fn build_saga(request: CreateSagaRequest, defaults: &engine::ExecutionDefaults) -> Result<Saga, ApiError> {
    let mut builder = SagaBuilder::new(&request.name)
        .input(request.input_data)
        .max_retries(request.max_retries.unwrap_or(defaults.max_retries))
        .timeout_ms(request.timeout_ms.unwrap_or(0))
        .priority(request.priority.unwrap_or(0));
    if let Some(correlation_id) = request.correlation_id {
        builder = builder.correlation_id(correlation_id);
    }
    for (key, value) in request.metadata {
        builder = builder.metadata(key, value);
    }
    for tag in request.tags {
        builder = builder.tag(tag);
    }
    for step_request in request.steps {
        let mut step = Step::new(&step_request.name, step_request.step_type, step_request.config);
        step.input_data = step_request.input_data;
        step.max_retries = step_request.max_retries.unwrap_or(defaults.max_retries);
        step.timeout_ms = step_request.timeout_ms.unwrap_or(defaults.timeout_ms);
        step.retry_delay_ms = step_request.retry_delay_ms.unwrap_or(defaults.retry_delay_ms);
        step.required = step_request.required.unwrap_or(true);
        step.compensatable = step_request.compensatable.unwrap_or(true);
        step.compensation_config = step_request.compensation;
        builder = builder.step(step);
    }
    builder
        .build()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

// -- Handlers --

/// POST /api/v1/sagas — create and (by default) start a saga.
#[tracing::instrument(skip(state, request), fields(name = %request.name))]
pub async fn create<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<CreateSagaRequest>,
) -> Result<(StatusCode, Json<SagaResponse>), ApiError> {
    let auto_start = request.auto_start.unwrap_or(true);
    let saga = build_saga(request, state.orchestrator.execution_defaults())?;
    let stored = state
        .orchestrator
        .create(saga, CreateSagaOptions { auto_start })
        .await?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

/// GET /api/v1/sagas/{id} — fetch one saga.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state
        .orchestrator
        .get(saga_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("saga {id} not found")).with_saga_id(&id))?;
    Ok(Json(saga.into()))
}

/// GET /api/v1/sagas?status=... — list by status, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SagaPageResponse>, ApiError> {
    let status: SagaStatus = query
        .status
        .parse()
        .map_err(|e: String| ApiError::bad_request(e))?;
    let page = PageRequest::new(query.page.unwrap_or(0), query.size.unwrap_or(20));
    let result = state.orchestrator.list_by_status(status, page).await?;
    Ok(Json(SagaPageResponse {
        items: result.items.into_iter().map(SagaResponse::from).collect(),
        page: result.page,
        size: result.size,
        total: result.total,
    }))
}

/// GET /api/v1/sagas/correlation/{cid} — list by correlation id.
#[tracing::instrument(skip(state))]
pub async fn by_correlation<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<Vec<SagaResponse>>, ApiError> {
    let sagas = state
        .orchestrator
        .list_by_correlation(&correlation_id)
        .await?;
    Ok(Json(sagas.into_iter().map(SagaResponse::from).collect()))
}

/// POST /api/v1/sagas/{id}/retry — administrative retry of a failed saga.
#[tracing::instrument(skip(state))]
pub async fn retry<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state.orchestrator.retry(saga_id).await?;
    Ok(Json(saga.into()))
}

/// POST /api/v1/sagas/{id}/compensate — administrative rollback.
#[tracing::instrument(skip(state))]
pub async fn compensate<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state.orchestrator.compensate(saga_id).await?;
    Ok(Json(saga.into()))
}

/// POST /api/v1/sagas/{id}/execute — synchronous drive.
#[tracing::instrument(skip(state))]
pub async fn execute<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state.orchestrator.execute(saga_id).await?;
    Ok(Json(saga.into()))
}
