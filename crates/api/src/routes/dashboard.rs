//! Dashboard overview endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use engine::orchestrator::DashboardOverview;
use saga_store::SagaStore;

use crate::error::ApiError;
use crate::AppState;

/// GET /api/v1/dashboard/overview — metrics snapshot, per-status counts,
/// and breaker states.
pub async fn overview<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<DashboardOverview>, ApiError> {
    let overview = state.orchestrator.dashboard_overview().await?;
    Ok(Json(overview))
}
