//! Execution agent types: static profiles, live health, and failover events.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static configuration of an execution agent (a provider/model pairing).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
    #[serde(default)]
    pub cost_per_request: f64,
    /// Quality signals in [0, 1].
    #[serde(default)]
    pub accuracy_score: f64,
    #[serde(default)]
    pub reliability_score: f64,
    #[serde(default)]
    pub speed_score: f64,
    #[serde(default)]
    pub rate_limits: RateLimits,
    /// Lower value = preferred on ties.
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AgentProfile {
    /// True if this profile advertises every required capability.
    pub fn supports_all<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }

    /// Estimated cost of a request consuming `tokens` tokens.
    pub fn estimate_cost(&self, tokens: u32) -> f64 {
        self.cost_per_1k_tokens * f64::from(tokens) / 1000.0 + self.cost_per_request
    }
}

/// Provider-side rate limits (informational for callers).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u32>,
}

/// Live health signal for an agent. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentHealth {
    pub agent: String,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_checked: DateTime<Utc>,
}

impl AgentHealth {
    /// The optimistic default for an agent with no observations.
    pub fn unobserved(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            is_healthy: true,
            consecutive_failures: 0,
            last_latency_ms: None,
            last_error: None,
            last_checked: Utc::now(),
        }
    }
}

/// A step capability moved from one agent to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailoverEvent {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    /// Whether the attempt on `to_agent` succeeded.
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ranking strategy used by the agent selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    LowestCost,
    #[default]
    HighestQuality,
    Fastest,
    Balanced,
    RoundRobin,
}

/// What a step needs from an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskRequirements {
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Expected token usage, used for cost estimation.
    #[serde(default)]
    pub estimated_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_accuracy: Option<f64>,
}

impl TaskRequirements {
    pub fn new<I, S>(capabilities: I, estimated_tokens: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            estimated_tokens,
            min_accuracy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AgentProfile {
        AgentProfile {
            name: "haiku".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-haiku".to_string(),
            capabilities: ["chat", "summarize"].iter().map(|s| s.to_string()).collect(),
            cost_per_1k_tokens: 0.25,
            cost_per_request: 0.01,
            accuracy_score: 0.8,
            reliability_score: 0.9,
            speed_score: 0.95,
            rate_limits: RateLimits::default(),
            priority: 1,
            enabled: true,
        }
    }

    #[test]
    fn test_supports_all() {
        let p = profile();
        let req = TaskRequirements::new(["chat"], 0);
        assert!(p.supports_all(&req.capabilities));
        let req = TaskRequirements::new(["chat", "vision"], 0);
        assert!(!p.supports_all(&req.capabilities));
    }

    #[test]
    fn test_estimate_cost() {
        let p = profile();
        assert!((p.estimate_cost(2000) - 0.51).abs() < 1e-9);
    }

    #[test]
    fn test_profile_deserialize_defaults() {
        let p: AgentProfile = serde_json::from_str(
            r#"{"name": "a", "provider": "p", "model": "m"}"#,
        )
        .unwrap();
        assert!(p.enabled);
        assert!(p.capabilities.is_empty());
        assert_eq!(p.priority, 0);
    }
}
