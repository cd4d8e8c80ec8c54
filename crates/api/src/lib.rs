//! HTTP API server for the saga orchestrator.
//!
//! Provides the REST surface over the orchestrator facade, with
//! structured logging (tracing), Prometheus metrics, CORS, and per-client
//! rate limiting on the operational routes.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use engine::{
    BusinessLogicExecutor, CircuitBreakerRegistry, EngineConfig, HttpStepExecutor,
    MetricsRegistry, Orchestrator, RateLimiter, StepExecutorRegistry, WaitStepExecutor,
};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore> {
    pub orchestrator: Arc<Orchestrator<S>>,
}

/// Per-client rate limiting keyed on the `X-Client-Id` header.
///
/// Requests without the header share the `"anonymous"` envelope.
async fn rate_limit<S: SagaStore + Clone + Send + Sync + 'static>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = request
        .headers()
        .get("x-client-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    if let Err(err) = state.orchestrator.check_rate_limit(&client_id) {
        return ApiError::from(err).into_response();
    }
    next.run(request).await
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + Clone + Send + Sync + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let api = Router::new()
        .route(
            "/api/v1/sagas",
            post(routes::sagas::create::<S>).get(routes::sagas::list::<S>),
        )
        .route("/api/v1/sagas/{id}", get(routes::sagas::get::<S>))
        .route(
            "/api/v1/sagas/correlation/{correlation_id}",
            get(routes::sagas::by_correlation::<S>),
        )
        .route("/api/v1/sagas/{id}/retry", post(routes::sagas::retry::<S>))
        .route(
            "/api/v1/sagas/{id}/compensate",
            post(routes::sagas::compensate::<S>),
        )
        .route(
            "/api/v1/sagas/{id}/execute",
            post(routes::sagas::execute::<S>),
        )
        .route(
            "/api/v1/dashboard/overview",
            get(routes::dashboard::overview::<S>),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::<S>,
        ))
        .with_state(state);

    Router::new()
        .route("/actuator/health", get(routes::health::check))
        .merge(api)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state: guards, built-in executors, and
/// the orchestrator over the given store.
///
/// Returns the business executor handle so the host can register its
/// in-process handlers.
pub async fn create_default_state<S: SagaStore + Clone + Send + Sync + 'static>(
    store: S,
    engine_config: EngineConfig,
    database_pool: Option<sqlx::PgPool>,
) -> (Arc<AppState<S>>, Arc<BusinessLogicExecutor>) {
    let metrics = Arc::new(MetricsRegistry::new());
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        engine_config.breaker.clone(),
        Arc::clone(&metrics),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        engine_config.rate_limit.clone(),
        Arc::clone(&metrics),
    ));

    let business = Arc::new(BusinessLogicExecutor::new());
    let mut registry = StepExecutorRegistry::new();
    registry.register(Arc::new(HttpStepExecutor::new(Arc::clone(&breakers))));
    registry.register(Arc::new(WaitStepExecutor::new()));
    registry.register(Arc::clone(&business) as Arc<dyn engine::StepExecutor>);
    if let Some(pool) = database_pool {
        registry.register(Arc::new(engine::DatabaseStepExecutor::new(
            pool,
            Arc::clone(&breakers),
        )));
    }

    let orchestrator = Orchestrator::new(
        store,
        registry,
        breakers,
        rate_limiter,
        metrics,
        engine_config,
    )
    .await;

    (Arc::new(AppState { orchestrator }), business)
}
