//! Per-run execution context.
//!
//! `ExecutionContext` is the mutable state that flows through one run: the
//! run-level inputs, accumulated variables, and the output of every step that
//! has completed so far. It is created at run start, grows after each
//! completed step, and is dropped when the run ends. Its durable projection is
//! the execution record plus step checkpoints, from which `restore` rebuilds it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use conductor_types::execution::{StepCheckpoint, StepStatus};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single step output (1 MiB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable state of a single workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    pub run_id: String,
    pub workflow_id: String,
    /// Run-level parameters supplied by the trigger.
    pub inputs: Map<String, Value>,
    /// Named values seeded by the caller.
    pub variables: Map<String, Value>,
    /// Outputs of completed steps keyed by step id.
    pub steps: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        inputs: Map<String, Value>,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            inputs,
            variables,
            steps: Map::new(),
        }
    }

    /// Rebuild a context for a resumed run from its stored checkpoints.
    ///
    /// Only COMPLETED checkpoints contribute outputs; `step_ids` maps a
    /// checkpoint's `step_index` back to the step id it was recorded under.
    pub fn restore(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        inputs: Map<String, Value>,
        variables: Map<String, Value>,
        checkpoints: &[StepCheckpoint],
        step_ids: &[&str],
    ) -> Self {
        let mut ctx = Self::new(run_id, workflow_id, inputs, variables);
        for cp in checkpoints
            .iter()
            .filter(|cp| cp.status == StepStatus::Completed)
        {
            let Some(step_id) = step_ids.get(cp.step_index as usize) else {
                continue;
            };
            ctx.set_step_output(step_id, cp.outputs.clone().unwrap_or(Value::Null));
        }
        ctx
    }

    /// Store the output of a completed step, truncating oversized values.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        let size = serde_json::to_string(&output).map_or(0, |s| s.len());
        let output = if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            truncation_marker(size)
        } else {
            output
        };
        self.steps.insert(step_id.to_string(), output);
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.steps.get(step_id)
    }

    /// All step outputs as a single JSON object (the run's outputs).
    pub fn outputs(&self) -> Value {
        Value::Object(self.steps.clone())
    }

    /// The JSON object templates and conditions are evaluated against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "inputs": { ... },
    ///   "variables": { ... },
    ///   "steps": { "<step_id>": <output>, ... },
    ///   "run": { "id": "...", "workflow_id": "..." }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        json!({
            "inputs": self.inputs,
            "variables": self.variables,
            "steps": self.steps,
            "run": {
                "id": self.run_id,
                "workflow_id": self.workflow_id,
            }
        })
    }
}

fn truncation_marker(original_size: usize) -> Value {
    json!({
        "_truncated": true,
        "_original_size": original_size,
        "_message": format!("output exceeded {MAX_STEP_OUTPUT_SIZE} byte limit and was truncated"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> ExecutionContext {
        let mut inputs = Map::new();
        inputs.insert("user".to_string(), json!("ada"));
        ExecutionContext::new("run-1", "wf", inputs, Map::new())
    }

    fn checkpoint(step_index: u32, status: StepStatus, outputs: Option<Value>) -> StepCheckpoint {
        StepCheckpoint {
            run_id: "run-1".to_string(),
            step_index,
            step_name: String::new(),
            status,
            started_at: Utc::now(),
            completed_at: None,
            inputs: None,
            outputs,
            error: None,
            retry_count: 0,
        }
    }

    #[test]
    fn test_set_and_get_step_output() {
        let mut ctx = ctx();
        ctx.set_step_output("fetch", json!({"status": 200}));
        assert_eq!(ctx.step_output("fetch"), Some(&json!({"status": 200})));
        assert_eq!(ctx.step_output("missing"), None);
        assert_eq!(ctx.outputs(), json!({"fetch": {"status": 200}}));
    }

    #[test]
    fn test_oversized_output_truncated() {
        let mut ctx = ctx();
        ctx.set_step_output("big", json!("x".repeat(MAX_STEP_OUTPUT_SIZE + 10)));
        assert_eq!(ctx.step_output("big").unwrap()["_truncated"], json!(true));
    }

    #[test]
    fn test_expression_context_shape() {
        let mut ctx = ctx();
        ctx.set_step_output("fetch", json!([1, 2]));
        let value = ctx.to_expression_context();
        assert_eq!(value["inputs"]["user"], json!("ada"));
        assert_eq!(value["steps"]["fetch"], json!([1, 2]));
        assert_eq!(value["run"]["id"], json!("run-1"));
        assert!(value["variables"].is_object());
    }

    #[test]
    fn test_restore_uses_completed_checkpoints_only() {
        let checkpoints = vec![
            checkpoint(0, StepStatus::Completed, Some(json!("a-out"))),
            checkpoint(1, StepStatus::Skipped, None),
            checkpoint(2, StepStatus::Failed, Some(json!("partial"))),
        ];
        let ctx = ExecutionContext::restore(
            "run-1",
            "wf",
            Map::new(),
            Map::new(),
            &checkpoints,
            &["a", "b", "c"],
        );
        assert_eq!(ctx.step_output("a"), Some(&json!("a-out")));
        assert!(ctx.step_output("b").is_none());
        assert!(ctx.step_output("c").is_none());
    }
}
