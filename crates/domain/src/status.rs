//! Saga and step status state machines.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// Transitions:
/// ```text
/// CREATED ──► RUNNING ──┬──► COMPLETED
///                       ├──► RETRYING ──► RUNNING
///                       ├──► COMPENSATING ──┬──► COMPENSATED
///                       │                   └──► FAILED
///                       └──► TIMEOUT
/// admin: FAILED ──► RUNNING (retry), FAILED|RUNNING ──► COMPENSATING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga has been persisted but execution has not started.
    #[default]
    Created,

    /// Saga steps are being executed.
    Running,

    /// A step failed and is being re-attempted.
    Retrying,

    /// Reserved; execution never enters this state.
    Paused,

    /// A required step failed terminally and rollback is in progress.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// The saga failed without a clean rollback (terminal).
    Failed,

    /// Rollback finished after a failure (terminal).
    Compensated,

    /// The saga wall-clock budget was exceeded (terminal).
    Timeout,
}

impl SagaStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated | SagaStatus::Timeout
        )
    }

    /// Returns true if the saga is actively being driven by the engine.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SagaStatus::Running | SagaStatus::Retrying | SagaStatus::Compensating
        )
    }

    /// Returns true if an administrative retry is permitted from this state.
    pub fn can_retry(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns true if an administrative compensation is permitted from this state.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Failed | SagaStatus::Running)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Created => "CREATED",
            SagaStatus::Running => "RUNNING",
            SagaStatus::Retrying => "RETRYING",
            SagaStatus::Paused => "PAUSED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(SagaStatus::Created),
            "RUNNING" => Ok(SagaStatus::Running),
            "RETRYING" => Ok(SagaStatus::Retrying),
            "PAUSED" => Ok(SagaStatus::Paused),
            "COMPENSATING" => Ok(SagaStatus::Compensating),
            "COMPLETED" => Ok(SagaStatus::Completed),
            "FAILED" => Ok(SagaStatus::Failed),
            "COMPENSATED" => Ok(SagaStatus::Compensated),
            "TIMEOUT" => Ok(SagaStatus::Timeout),
            other => Err(format!("unknown saga status: {other}")),
        }
    }
}

/// The status of an individual step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step has not been attempted yet.
    #[default]
    Created,

    /// An attempt is in flight.
    Running,

    /// The step completed successfully.
    Completed,

    /// The step failed terminally.
    Failed,

    /// The step's compensation is in flight.
    Compensating,

    /// The step's compensation completed.
    Compensated,

    /// A single attempt exceeded its deadline, or the saga budget expired mid-step.
    Timeout,

    /// The step failed and a re-attempt is pending.
    Retrying,

    /// A non-required step failed terminally and was skipped.
    Skipped,
}

impl StepStatus {
    /// Returns true if the step will not be attempted again.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::Compensated
                | StepStatus::Skipped
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Created => "CREATED",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensating => "COMPENSATING",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::Timeout => "TIMEOUT",
            StepStatus::Retrying => "RETRYING",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of work a step performs.
///
/// `MessageQueue`, `FileOp`, `Conditional`, `Parallel`, and `SubSaga` are
/// reserved: the engine fails closed with an unsupported-type step failure
/// unless the host registers an executor for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    HttpCall,
    DatabaseOp,
    BusinessLogic,
    MessageQueue,
    FileOp,
    Wait,
    Conditional,
    Parallel,
    SubSaga,
}

impl StepType {
    /// Returns the type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::HttpCall => "HTTP_CALL",
            StepType::DatabaseOp => "DATABASE_OP",
            StepType::BusinessLogic => "BUSINESS_LOGIC",
            StepType::MessageQueue => "MESSAGE_QUEUE",
            StepType::FileOp => "FILE_OP",
            StepType::Wait => "WAIT",
            StepType::Conditional => "CONDITIONAL",
            StepType::Parallel => "PARALLEL",
            StepType::SubSaga => "SUB_SAGA",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_saga_status_is_created() {
        assert_eq!(SagaStatus::default(), SagaStatus::Created);
    }

    #[test]
    fn terminal_states() {
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::Timeout.is_terminal());
        assert!(!SagaStatus::Created.is_terminal());
        assert!(!SagaStatus::Running.is_terminal());
        assert!(!SagaStatus::Retrying.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
    }

    #[test]
    fn retry_only_from_failed() {
        assert!(SagaStatus::Failed.can_retry());
        assert!(!SagaStatus::Completed.can_retry());
        assert!(!SagaStatus::Running.can_retry());
        assert!(!SagaStatus::Timeout.can_retry());
    }

    #[test]
    fn compensate_from_failed_or_running() {
        assert!(SagaStatus::Failed.can_compensate());
        assert!(SagaStatus::Running.can_compensate());
        assert!(!SagaStatus::Compensated.can_compensate());
        assert!(!SagaStatus::Created.can_compensate());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SagaStatus::Created,
            SagaStatus::Running,
            SagaStatus::Retrying,
            SagaStatus::Paused,
            SagaStatus::Compensating,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensated,
            SagaStatus::Timeout,
        ] {
            assert_eq!(status.as_str().parse::<SagaStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&SagaStatus::Compensating).unwrap();
        assert_eq!(json, "\"COMPENSATING\"");
        let json = serde_json::to_string(&StepType::HttpCall).unwrap();
        assert_eq!(json, "\"HTTP_CALL\"");
        let json = serde_json::to_string(&StepStatus::Skipped).unwrap();
        assert_eq!(json, "\"SKIPPED\"");
    }

    #[test]
    fn settled_step_statuses() {
        assert!(StepStatus::Completed.is_settled());
        assert!(StepStatus::Skipped.is_settled());
        assert!(!StepStatus::Running.is_settled());
        assert!(!StepStatus::Retrying.is_settled());
    }
}
