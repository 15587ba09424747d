//! Workflow definition types.
//!
//! A `Workflow` is the immutable, declarative description of a multi-step
//! run: metadata, an ordered list of steps, the tools those steps need, and
//! optional trigger declarations. The engine only ever reads it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An immutable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Identity and descriptive fields.
    pub metadata: WorkflowMetadata,
    /// Steps in declaration order. Executed strictly sequentially.
    pub steps: Vec<WorkflowStep>,
    /// Tool/service configurations keyed by tool name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, ToolConfig>,
    /// Trigger declarations (informational for trigger producers).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TriggerDeclaration>,
    /// Workflow-wide failover defaults, used by steps without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover: Option<FailoverConfig>,
}

impl Workflow {
    /// The workflow identifier.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Effective failover configuration for a step (step-level wins).
    pub fn failover_for<'a>(&'a self, step: &'a WorkflowStep) -> Option<&'a FailoverConfig> {
        step.failover.as_ref().or(self.failover.as_ref())
    }
}

/// Identity and descriptive fields of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Declared configuration for a tool the workflow uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    /// A required tool that cannot be registered fails the run before any step.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Opaque tool-specific settings handed to the registry.
    #[serde(default)]
    pub config: Value,
}

fn default_true() -> bool {
    true
}

/// How a workflow may be started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDeclaration {
    /// Cron-style schedule (5-field expression).
    Cron { schedule: String },
    /// Delivered through the work queue.
    Queue {
        #[serde(default)]
        priority: crate::queue::MessagePriority,
    },
    /// Inbound webhook (handled outside the core).
    Webhook { path: String },
    /// Started explicitly by an operator or API call.
    Manual,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow.
    pub id: String,
    /// Optional human-readable name; `id` is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The capability to invoke and the provider that serves it.
    pub action: StepAction,
    /// Inputs, possibly containing `{{ }}` template expressions.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// JEXL expression; the step is skipped when it evaluates falsy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover: Option<FailoverConfig>,
    /// Unset means abort the run when the step fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
}

impl WorkflowStep {
    /// Create a step with only the required fields set.
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            name: None,
            action,
            inputs: Map::new(),
            condition: None,
            retry: None,
            failover: None,
            continue_on_error: None,
        }
    }

    /// Name used in checkpoints and logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The single place the `continue_on_error` default is decided: abort.
    pub fn continues_on_error(&self) -> bool {
        self.continue_on_error.unwrap_or(false)
    }

    /// Effective retry policy (no retries when unset).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default()
    }
}

/// A `(provider, capability)` pair naming what a step does and who does it.
///
/// Serialized as `"provider.capability"`. Failover substitutes the provider
/// and never touches the capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepAction {
    pub provider: String,
    pub capability: String,
}

impl StepAction {
    pub fn new(provider: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            capability: capability.into(),
        }
    }

    /// Parse `"provider.capability"`. The provider ends at the first dot.
    pub fn parse(action: &str) -> Result<Self, InvalidAction> {
        let (provider, capability) = action
            .split_once('.')
            .ok_or_else(|| InvalidAction(action.to_string()))?;
        if provider.is_empty() || capability.is_empty() {
            return Err(InvalidAction(action.to_string()));
        }
        Ok(Self::new(provider, capability))
    }

    /// The same capability served by a different provider.
    pub fn with_provider(&self, provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            capability: self.capability.clone(),
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider, self.capability)
    }
}

impl TryFrom<String> for StepAction {
    type Error = InvalidAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StepAction> for String {
    fn from(action: StepAction) -> Self {
        action.to_string()
    }
}

/// An action string that is not of the form `provider.capability`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid action '{0}': expected 'provider.capability'")]
pub struct InvalidAction(pub String);

// ---------------------------------------------------------------------------
// Retry / failover policy
// ---------------------------------------------------------------------------

/// Retry policy for a step. Retries keep the action unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    #[serde(default)]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Multiplier applied to the delay for each subsequent retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> std::time::Duration {
        if self.delay_ms == 0 || retry == 0 {
            return std::time::Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32 - 1);
        std::time::Duration::from_millis((self.delay_ms as f64 * factor) as u64)
    }
}

/// Alternate providers tried, in order, once retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FailoverConfig {
    #[serde(default)]
    pub fallback_agents: Vec<String>,
    #[serde(default)]
    pub max_failover_attempts: u32,
}

impl FailoverConfig {
    /// The fallback providers that will actually be attempted.
    pub fn attempt_plan(&self) -> impl Iterator<Item = &str> {
        self.fallback_agents
            .iter()
            .map(String::as_str)
            .take(self.max_failover_attempts as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_parse_and_display() {
        let action = StepAction::parse("slack.post_message").unwrap();
        assert_eq!(action.provider, "slack");
        assert_eq!(action.capability, "post_message");
        assert_eq!(action.to_string(), "slack.post_message");
    }

    #[test]
    fn test_action_capability_keeps_inner_dots() {
        let action = StepAction::parse("openai.chat.completions").unwrap();
        assert_eq!(action.provider, "openai");
        assert_eq!(action.capability, "chat.completions");
    }

    #[test]
    fn test_action_rejects_malformed() {
        assert!(StepAction::parse("nodot").is_err());
        assert!(StepAction::parse(".op").is_err());
        assert!(StepAction::parse("svc.").is_err());
    }

    #[test]
    fn test_with_provider_holds_capability() {
        let action = StepAction::new("primary", "op");
        let fallback = action.with_provider("fallback");
        assert_eq!(fallback.to_string(), "fallback.op");
        assert_eq!(fallback.capability, action.capability);
    }

    #[test]
    fn test_workflow_deserializes_from_json() {
        let wf: Workflow = serde_json::from_value(json!({
            "metadata": {"id": "digest", "name": "Daily digest"},
            "steps": [
                {"id": "fetch", "action": "http.get", "inputs": {"url": "{{ inputs.url }}"}},
                {"id": "post", "action": "slack.post", "continue_on_error": true,
                 "retry": {"max_retries": 2},
                 "failover": {"fallback_agents": ["teams"], "max_failover_attempts": 1}}
            ],
            "tools": {"slack": {"config": {"channel": "#ops"}}},
            "triggers": [{"type": "cron", "schedule": "0 9 * * 1-5"}]
        }))
        .unwrap();

        assert_eq!(wf.id(), "digest");
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].action, StepAction::new("http", "get"));
        assert!(!wf.steps[0].continues_on_error());
        assert!(wf.steps[1].continues_on_error());
        assert_eq!(wf.steps[1].retry_policy().max_retries, 2);
        assert!(wf.tools["slack"].required);
        assert_eq!(
            wf.triggers[0],
            TriggerDeclaration::Cron {
                schedule: "0 9 * * 1-5".to_string()
            }
        );
    }

    #[test]
    fn test_step_failover_overrides_workflow_default() {
        let mut wf: Workflow = serde_json::from_value(json!({
            "metadata": {"id": "w", "name": "w"},
            "steps": [{"id": "a", "action": "p.op"}, {"id": "b", "action": "p.op"}],
            "failover": {"fallback_agents": ["x"], "max_failover_attempts": 1}
        }))
        .unwrap();
        wf.steps[1].failover = Some(FailoverConfig {
            fallback_agents: vec!["y".to_string()],
            max_failover_attempts: 1,
        });

        assert_eq!(wf.failover_for(&wf.steps[0]).unwrap().fallback_agents, vec!["x"]);
        assert_eq!(wf.failover_for(&wf.steps[1]).unwrap().fallback_agents, vec!["y"]);
    }

    #[test]
    fn test_attempt_plan_is_bounded() {
        let cfg = FailoverConfig {
            fallback_agents: vec!["a".into(), "b".into(), "c".into()],
            max_failover_attempts: 2,
        };
        assert_eq!(cfg.attempt_plan().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1).as_millis(), 100);
        assert_eq!(policy.delay_for(2).as_millis(), 200);
        assert_eq!(policy.delay_for(3).as_millis(), 400);
        assert_eq!(RetryPolicy::default().delay_for(1).as_millis(), 0);
    }
}
