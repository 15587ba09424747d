//! Retry and failover attempt planning.
//!
//! A failing step is attempted on its own provider `1 + max_retries` times,
//! then once on each fallback provider allowed by its failover config. The
//! plan is computed up front so the engine loop only walks a list.

use std::time::Duration;

use conductor_types::workflow::{FailoverConfig, RetryPolicy, StepAction, WorkflowStep};

/// One planned invocation of the step executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub action: StepAction,
    pub kind: AttemptKind,
    /// Sleep before invoking.
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptKind {
    /// The step's own action; `retry` is 0 for the first try.
    Primary { retry: u32 },
    /// A fallback provider replacing `from`.
    Failover { from: String },
}

/// Stateless attempt planner.
pub struct RetryHandler;

impl RetryHandler {
    /// The full ordered attempt list for `step`.
    pub fn plan(step: &WorkflowStep, failover: Option<&FailoverConfig>) -> Vec<Attempt> {
        let policy = step.retry_policy();
        let mut attempts = Self::primary_attempts(&step.action, &policy);

        let mut previous = step.action.provider.clone();
        for provider in failover.into_iter().flat_map(|f| f.attempt_plan()) {
            attempts.push(Attempt {
                action: step.action.with_provider(provider),
                kind: AttemptKind::Failover {
                    from: previous.clone(),
                },
                delay: Duration::ZERO,
            });
            previous = provider.to_string();
        }
        attempts
    }

    fn primary_attempts(action: &StepAction, policy: &RetryPolicy) -> Vec<Attempt> {
        (0..=policy.max_retries)
            .map(|retry| Attempt {
                action: action.clone(),
                kind: AttemptKind::Primary { retry },
                delay: policy.delay_for(retry),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(max_retries: u32) -> WorkflowStep {
        let mut step = WorkflowStep::new("s", StepAction::new("primary", "op"));
        step.retry = Some(RetryPolicy {
            max_retries,
            delay_ms: 10,
            backoff_multiplier: 2.0,
        });
        step
    }

    #[test]
    fn test_plan_without_failover() {
        let plan = RetryHandler::plan(&step(2), None);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].delay, Duration::ZERO);
        assert_eq!(plan[1].delay, Duration::from_millis(10));
        assert_eq!(plan[2].delay, Duration::from_millis(20));
        assert!(plan.iter().all(|a| a.action.provider == "primary"));
    }

    #[test]
    fn test_plan_with_failover_chain() {
        let failover = FailoverConfig {
            fallback_agents: vec!["b".into(), "c".into(), "d".into()],
            max_failover_attempts: 2,
        };
        let plan = RetryHandler::plan(&step(0), Some(&failover));
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[1].action.to_string(), "b.op");
        assert_eq!(plan[1].kind, AttemptKind::Failover { from: "primary".into() });
        assert_eq!(plan[2].action.to_string(), "c.op");
        assert_eq!(plan[2].kind, AttemptKind::Failover { from: "b".into() });
    }

    #[test]
    fn test_zero_failover_attempts_adds_nothing() {
        let failover = FailoverConfig {
            fallback_agents: vec!["b".into()],
            max_failover_attempts: 0,
        };
        assert_eq!(RetryHandler::plan(&step(1), Some(&failover)).len(), 2);
    }
}
