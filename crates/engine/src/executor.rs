//! The step executor contract.

use async_trait::async_trait;
use domain::{DataMap, Step, StepType};

/// Result of one step execution attempt.
///
/// Failures are data, not errors: the engine decides between retry, skip,
/// and compensation from the saga's configuration.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub success: bool,
    pub output: DataMap,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub duration_ms: Option<u64>,
}

impl StepOutcome {
    /// A successful outcome carrying the step's output.
    pub fn ok(output: DataMap) -> Self {
        Self {
            success: true,
            output,
            ..Default::default()
        }
    }

    /// A failed outcome with an error message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Attaches diagnostic detail to a failure.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.error_trace = Some(trace.into());
        self
    }

    /// Attaches the observed execution time.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Adapter executing one kind of step.
///
/// Executors must respect the engine's cancellation (the engine bounds
/// each attempt with a deadline), route external calls through the circuit
/// breaker for their service identity, and tolerate repeat invocations:
/// the engine delivers at-least-once, with compensations handling
/// duplicates.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Executes one attempt of `step` with the saga's input available.
    async fn execute(&self, step: &Step, saga_input: &DataMap) -> StepOutcome;

    /// The step type this executor handles.
    fn step_type(&self) -> StepType;
}

/// Builds the substitution context for an attempt: the saga input overlaid
/// with the step's own input, step entries winning on collision.
pub fn attempt_context(step: &Step, saga_input: &DataMap) -> DataMap {
    let mut ctx = saga_input.clone();
    for (key, value) in &step.input_data {
        ctx.insert(key.clone(), value.clone());
    }
    ctx
}

/// Renders `{{key}}` placeholders in a template from the context map.
///
/// String values substitute bare; other values substitute as JSON. Unknown
/// keys are left in place so the receiving service sees what was missing.
pub fn render_template(template: &str, ctx: &DataMap) -> String {
    let mut rendered = template.to_string();
    for (key, value) in ctx {
        let placeholder = format!("{{{{{key}}}}}");
        if !rendered.contains(&placeholder) {
            continue;
        }
        let replacement = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, serde_json::Value)]) -> DataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn outcome_constructors() {
        let ok = StepOutcome::ok(map(&[("id", json!("r-1"))]));
        assert!(ok.success);
        assert_eq!(ok.output["id"], json!("r-1"));

        let failed = StepOutcome::failure("connection refused").with_trace("stack");
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("connection refused"));
        assert_eq!(failed.error_trace.as_deref(), Some("stack"));
    }

    #[test]
    fn attempt_context_step_input_wins() {
        let step = domain::Step::wait("pause", 1)
            .with_input(map(&[("region", json!("eu")), ("attempt", json!(2))]));
        let saga_input = map(&[("region", json!("us")), ("order", json!("o-1"))]);

        let ctx = attempt_context(&step, &saga_input);
        assert_eq!(ctx["region"], json!("eu"));
        assert_eq!(ctx["order"], json!("o-1"));
        assert_eq!(ctx["attempt"], json!(2));
    }

    #[test]
    fn render_substitutes_strings_bare_and_values_as_json() {
        let ctx = map(&[("order_id", json!("o-42")), ("amount", json!(1299))]);
        let rendered = render_template(
            r#"{"order": "{{order_id}}", "cents": {{amount}}}"#,
            &ctx,
        );
        assert_eq!(rendered, r#"{"order": "o-42", "cents": 1299}"#);
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let ctx = map(&[("a", json!("x"))]);
        assert_eq!(render_template("{{a}}-{{missing}}", &ctx), "x-{{missing}}");
    }
}
