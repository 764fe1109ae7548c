use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ExecutionStep, NewStep, StepStatus};

/// Append-only log of execution steps, keyed by (session, message, iteration,
/// ordinal) (spec.md C5).
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Append a new step row and return it.
    async fn append_step(&self, session_id: &str, step: NewStep) -> Result<ExecutionStep>;

    /// Update the reasoning text (and status/progress) of an existing step
    /// in place. Used for in-flight thinking steps as reasoning deltas
    /// arrive (spec.md §4.5).
    async fn update_step_reasoning(
        &self,
        step_id: i64,
        reasoning: &str,
        progress: u8,
    ) -> Result<ExecutionStep>;

    /// Mark a step terminal, filling in whichever tool/result/error fields
    /// are relevant and bumping progress.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_step(
        &self,
        step_id: i64,
        status: StepStatus,
        progress: u8,
        tool_result: Option<&str>,
        tool_error: Option<&str>,
    ) -> Result<ExecutionStep>;

    /// All steps for a message, in insertion order.
    async fn list_steps(&self, message_id: i64) -> Result<Vec<ExecutionStep>>;

    /// The most recently appended step for a message, if any.
    async fn latest_step(&self, message_id: i64) -> Result<Option<ExecutionStep>>;

    /// The latest step across the most recent assistant message in a
    /// session — used by the `_internal/latest/execution-steps` endpoint.
    async fn latest_step_for_session(&self, session_id: &str) -> Result<Option<ExecutionStep>>;
}
