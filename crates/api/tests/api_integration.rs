//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::DataMap;
use engine::{BusinessHandler, EngineConfig, RateLimitConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::InMemorySagaStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct OkHandler;

#[async_trait]
impl BusinessHandler for OkHandler {
    async fn run(&self, _method: Option<&str>, _input: &DataMap) -> Result<DataMap, String> {
        let mut output = DataMap::new();
        output.insert("handled".into(), serde_json::json!(true));
        Ok(output)
    }
}

async fn setup_with_config(config: EngineConfig) -> axum::Router {
    let store = InMemorySagaStore::new();
    let (state, business) = api::create_default_state(store, config, None).await;
    business.register("test.ok", Arc::new(OkHandler));
    api::create_app(state, get_metrics_handle())
}

async fn setup() -> axum::Router {
    setup_with_config(EngineConfig::default()).await
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_request(auto_start: bool) -> Request<Body> {
    let payload = serde_json::json!({
        "name": "order-fulfillment",
        "correlation_id": "order-42",
        "input_data": {"order": "o-42"},
        "auto_start": auto_start,
        "steps": [
            {"name": "reserve", "type": "BUSINESS_LOGIC",
             "config": {"handler": "test.ok"}, "max_retries": 0},
            {"name": "charge", "type": "BUSINESS_LOGIC",
             "config": {"handler": "test.ok"}, "max_retries": 0}
        ]
    });
    Request::builder()
        .method("POST")
        .uri("/api/v1/sagas")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check_is_up() {
    let app = setup().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/actuator/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "UP");
}

#[tokio::test]
async fn create_returns_201_with_saga() {
    let app = setup().await;
    let response = app.oneshot(create_request(false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["name"], "order-fulfillment");
    assert_eq!(json["status"], "CREATED");
    assert_eq!(json["steps"].as_array().unwrap().len(), 2);
    assert_eq!(json["steps"][1]["order"], 1);
    assert_eq!(json["version"], 1);
}

#[tokio::test]
async fn create_then_execute_completes() {
    let app = setup().await;
    let created = app
        .clone()
        .oneshot(create_request(false))
        .await
        .unwrap();
    let created = body_json(created).await;
    let id = created["saga_id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/sagas/{id}/execute"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["output_data"]["handled"], serde_json::json!(true));

    // Fetch reflects the terminal state.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/sagas/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "COMPLETED");
}

#[tokio::test]
async fn missing_saga_returns_uniform_404_body() {
    let app = setup().await;
    let id = uuid::Uuid::new_v4();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/sagas/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["status"], 404);
    assert_eq!(json["errorCode"], "NOT_FOUND");
    assert_eq!(json["severity"], "LOW");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn invalid_saga_id_is_a_400() {
    let app = setup().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_by_status_filters() {
    let app = setup().await;
    app.clone().oneshot(create_request(false)).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas?status=CREATED")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 1);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas?status=COMPLETED")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn list_with_unknown_status_is_a_400() {
    let app = setup().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas?status=NONSENSE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn correlation_lookup_finds_related_sagas() {
    let app = setup().await;
    app.clone().oneshot(create_request(false)).await.unwrap();
    app.clone().oneshot(create_request(false)).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas/correlation/order-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn retry_of_non_failed_saga_is_a_400() {
    let app = setup().await;
    let created = body_json(app.clone().oneshot(create_request(false)).await.unwrap()).await;
    let id = created["saga_id"].as_str().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/sagas/{id}/retry"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["errorCode"], "INVALID_STATE");
}

#[tokio::test]
async fn dashboard_overview_reports_counts_and_metrics() {
    let app = setup().await;
    app.clone().oneshot(create_request(false)).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/dashboard/overview")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status_counts"]["CREATED"], 1);
    assert!(json["metrics"]["total_sagas"].is_number());
    assert!(json["circuit_breakers"].is_array());
}

#[tokio::test]
async fn rate_limit_rejects_with_429() {
    let config = EngineConfig {
        rate_limit: RateLimitConfig {
            burst_limit: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let app = setup_with_config(config).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/sagas?status=CREATED")
                    .header("x-client-id", "tenant-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas?status=CREATED")
                .header("x-client-id", "tenant-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = body_json(response).await;
    assert_eq!(json["errorCode"], "RATE_LIMITED");

    // Another client is unaffected.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/sagas?status=CREATED")
                .header("x-client-id", "tenant-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Probes bypass the limiter entirely.
    let response = setup_with_config(EngineConfig {
        rate_limit: RateLimitConfig {
            burst_limit: 0,
            ..Default::default()
        },
        ..Default::default()
    })
    .await
    .oneshot(
        Request::builder()
            .uri("/actuator/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let app = setup().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
