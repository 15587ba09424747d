//! Per-agent health signal and failover history.
//!
//! Health is a two-state signal driven purely by explicit reports. Each
//! agent's entry is updated under its own `DashMap` shard lock, so concurrent
//! reports for one agent serialize while different agents proceed
//! independently. Nothing here is persisted.

use std::sync::Mutex;

use chrono::Utc;
use conductor_types::agent::{AgentHealth, FailoverEvent};
use dashmap::DashMap;

// ---------------------------------------------------------------------------
// HealthTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct HealthTracker {
    agents: DashMap<String, AgentHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call: clears the failure streak.
    pub fn mark_healthy(&self, agent: &str, latency_ms: u64) {
        let mut entry = self
            .agents
            .entry(agent.to_string())
            .or_insert_with(|| AgentHealth::unobserved(agent));
        entry.is_healthy = true;
        entry.consecutive_failures = 0;
        entry.last_latency_ms = Some(latency_ms);
        entry.last_checked = Utc::now();
    }

    /// Record a failed call.
    pub fn mark_unhealthy(&self, agent: &str, reason: &str) {
        let mut entry = self
            .agents
            .entry(agent.to_string())
            .or_insert_with(|| AgentHealth::unobserved(agent));
        entry.is_healthy = false;
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_error = Some(reason.to_string());
        entry.last_checked = Utc::now();

        tracing::debug!(
            agent,
            consecutive_failures = entry.consecutive_failures,
            reason,
            "agent marked unhealthy"
        );
    }

    /// Agents with no observations are healthy.
    pub fn is_healthy(&self, agent: &str) -> bool {
        self.agents.get(agent).is_none_or(|h| h.is_healthy)
    }

    pub fn get(&self, agent: &str) -> AgentHealth {
        self.agents
            .get(agent)
            .map(|h| h.value().clone())
            .unwrap_or_else(|| AgentHealth::unobserved(agent))
    }

    /// Every observed agent, sorted by name.
    pub fn snapshot(&self) -> Vec<AgentHealth> {
        let mut all: Vec<AgentHealth> = self.agents.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.agent.cmp(&b.agent));
        all
    }
}

// ---------------------------------------------------------------------------
// FailoverHistory
// ---------------------------------------------------------------------------

/// Append-only in-memory log of failover events.
#[derive(Debug, Default)]
pub struct FailoverHistory {
    events: Mutex<Vec<FailoverEvent>>,
}

impl FailoverHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, from_agent: &str, to_agent: &str, reason: &str, succeeded: bool) {
        let event = FailoverEvent {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            reason: reason.to_string(),
            succeeded,
            timestamp: Utc::now(),
        };
        tracing::info!(
            from_agent,
            to_agent,
            succeeded,
            "failover attempt recorded"
        );
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<FailoverEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unobserved_agent_is_healthy() {
        let tracker = HealthTracker::new();
        assert!(tracker.is_healthy("never-seen"));
        let health = tracker.get("never-seen");
        assert!(health.is_healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn failures_accumulate_and_success_resets() {
        let tracker = HealthTracker::new();
        tracker.mark_unhealthy("a", "timeout");
        tracker.mark_unhealthy("a", "502");
        let health = tracker.get("a");
        assert!(!health.is_healthy);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("502"));

        tracker.mark_healthy("a", 120);
        let health = tracker.get("a");
        assert!(health.is_healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_latency_ms, Some(120));
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let tracker = Arc::new(HealthTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.mark_unhealthy("shared", "err");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.get("shared").consecutive_failures, 800);
    }

    #[test]
    fn history_appends_in_order() {
        let history = FailoverHistory::new();
        assert!(history.is_empty());
        history.record("a", "b", "timeout", false);
        history.record("b", "c", "timeout", true);
        let events = history.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].to_agent, "c");
        assert!(events[1].succeeded);
    }
}
