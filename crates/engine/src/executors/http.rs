//! HTTP call step executor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{DataMap, Step, StepType};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::breaker::CircuitBreakerRegistry;
use crate::executor::{attempt_context, render_template, StepExecutor, StepOutcome};

/// Executes `HTTP_CALL` steps with `reqwest`, guarded by the circuit
/// breaker for the URL's host.
pub struct HttpStepExecutor {
    client: reqwest::Client,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl HttpStepExecutor {
    /// Creates the executor with a shared client.
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            client: reqwest::Client::new(),
            breakers,
        }
    }

    /// Extracts the circuit-breaker service identity from a URL.
    fn service_identity(url: &str) -> String {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown-service".to_string())
    }

    fn accepted(status: u16, expected: &[u16]) -> bool {
        if expected.is_empty() {
            return (200..300).contains(&status);
        }
        expected.contains(&status)
    }
}

#[async_trait]
impl StepExecutor for HttpStepExecutor {
    async fn execute(&self, step: &Step, saga_input: &DataMap) -> StepOutcome {
        let config = &step.config;
        let Some(url) = config.url.as_deref() else {
            return StepOutcome::failure(format!("HTTP step '{}' has no url configured", step.name));
        };
        let method_name = config.http_method.as_deref().unwrap_or("GET");
        let Ok(method) = reqwest::Method::from_bytes(method_name.as_bytes()) else {
            return StepOutcome::failure(format!("invalid HTTP method: {method_name}"));
        };

        let service = Self::service_identity(url);
        if let Err(err) = self.breakers.check(&service) {
            return StepOutcome::failure(err.to_string());
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                return StepOutcome::failure(format!("invalid header name: {name}"));
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                return StepOutcome::failure(format!("invalid header value for {name:?}"));
            };
            headers.insert(name, value);
        }

        let ctx = attempt_context(step, saga_input);
        let mut request = self.client.request(method.clone(), url).headers(headers);
        if let Some(template) = config.request_body_template.as_deref() {
            request = request.body(render_template(template, &ctx));
        }

        tracing::debug!(step = %step.name, %method, url, service, "executing HTTP step");
        let started = Utc::now();
        let response = request.send().await;
        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let body_text = response.text().await.unwrap_or_default();
                if Self::accepted(status, &config.expected_status_codes) {
                    self.breakers.record_success(&service);
                    let mut output = DataMap::new();
                    output.insert("status".into(), serde_json::json!(status));
                    let body = serde_json::from_str::<serde_json::Value>(&body_text)
                        .unwrap_or(serde_json::Value::String(body_text));
                    output.insert("body".into(), body);
                    StepOutcome::ok(output).with_duration_ms(duration_ms)
                } else {
                    self.breakers.record_failure(&service);
                    StepOutcome::failure(format!("unexpected HTTP status {status} from {service}"))
                        .with_trace(body_text)
                        .with_duration_ms(duration_ms)
                }
            }
            Err(err) => {
                self.breakers.record_failure(&service);
                StepOutcome::failure(format!("HTTP call failed: {err}"))
                    .with_duration_ms(duration_ms)
            }
        }
    }

    fn step_type(&self) -> StepType {
        StepType::HttpCall
    }
}
