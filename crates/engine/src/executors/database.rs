//! Database operation step executor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{DataMap, Step, StepType};
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgPool};

use crate::breaker::CircuitBreakerRegistry;
use crate::executor::{StepExecutor, StepOutcome};

/// Executes `DATABASE_OP` steps as parameterized statements against a
/// shared pool; success is driver success.
///
/// The breaker service identity is the `service_label` config property,
/// falling back to `"database"`.
pub struct DatabaseStepExecutor {
    pool: PgPool,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl DatabaseStepExecutor {
    /// Creates the executor over an existing pool.
    pub fn new(pool: PgPool, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { pool, breakers }
    }

    fn service_identity(step: &Step) -> String {
        step.config
            .properties
            .get("service_label")
            .and_then(|v| v.as_str())
            .unwrap_or("database")
            .to_string()
    }

    fn bind_parameters(parameters: &[serde_json::Value]) -> Result<PgArguments, String> {
        let mut arguments = PgArguments::default();
        for value in parameters {
            let result = match value {
                serde_json::Value::Null => arguments.add(Option::<String>::None),
                serde_json::Value::Bool(b) => arguments.add(*b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        arguments.add(i)
                    } else {
                        arguments.add(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::String(s) => arguments.add(s.clone()),
                other => arguments.add(other.clone()),
            };
            result.map_err(|e| format!("failed to bind parameter: {e}"))?;
        }
        Ok(arguments)
    }
}

#[async_trait]
impl StepExecutor for DatabaseStepExecutor {
    async fn execute(&self, step: &Step, _saga_input: &DataMap) -> StepOutcome {
        let Some(query) = step.config.query.as_deref() else {
            return StepOutcome::failure(format!(
                "database step '{}' has no query configured",
                step.name
            ));
        };

        let service = Self::service_identity(step);
        if let Err(err) = self.breakers.check(&service) {
            return StepOutcome::failure(err.to_string());
        }

        let arguments = match Self::bind_parameters(&step.config.query_parameters) {
            Ok(arguments) => arguments,
            Err(message) => return StepOutcome::failure(message),
        };

        tracing::debug!(step = %step.name, service, "executing database step");
        let started = Utc::now();
        let result = sqlx::query_with(query, arguments).execute(&self.pool).await;
        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

        match result {
            Ok(done) => {
                self.breakers.record_success(&service);
                let mut output = DataMap::new();
                output.insert(
                    "rows_affected".into(),
                    serde_json::json!(done.rows_affected()),
                );
                StepOutcome::ok(output).with_duration_ms(duration_ms)
            }
            Err(err) => {
                self.breakers.record_failure(&service);
                StepOutcome::failure(format!("database operation failed: {err}"))
                    .with_duration_ms(duration_ms)
            }
        }
    }

    fn step_type(&self) -> StepType {
        StepType::DatabaseOp
    }
}
