//! Strategy-driven agent selection.
//!
//! Every strategy is a pure ranking over the enabled profiles that satisfy the
//! task's capability set. Ties are always broken by `priority` then `name`, so
//! identical inputs give identical picks. `RoundRobin` is the one strategy with
//! state: a cursor that walks the sorted eligible set.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use conductor_types::agent::{AgentProfile, SelectionStrategy, TaskRequirements};
use serde::{Deserialize, Serialize};

use super::health::HealthTracker;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no eligible agent for capabilities [{}]", .required.join(", "))]
    NoEligibleAgent { required: Vec<String> },
}

/// Weights of the `Balanced` composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancedWeights {
    pub cost: f64,
    pub quality: f64,
    pub speed: f64,
    pub reliability: f64,
}

impl Default for BalancedWeights {
    fn default() -> Self {
        Self {
            cost: 0.3,
            quality: 0.4,
            speed: 0.2,
            reliability: 0.1,
        }
    }
}

/// Per-dimension scores in [0, 1] and their weighted total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Cheapest eligible cost divided by this agent's cost.
    pub cost: f64,
    pub quality: f64,
    pub speed: f64,
    pub reliability: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub agent: AgentProfile,
    pub score: ScoreBreakdown,
    pub estimated_cost: f64,
}

// ---------------------------------------------------------------------------
// AgentSelector
// ---------------------------------------------------------------------------

pub struct AgentSelector {
    profiles: Vec<AgentProfile>,
    strategy: SelectionStrategy,
    weights: BalancedWeights,
    health: Option<Arc<HealthTracker>>,
    cursor: AtomicUsize,
}

impl AgentSelector {
    pub fn new(profiles: Vec<AgentProfile>, strategy: SelectionStrategy) -> Self {
        Self {
            profiles,
            strategy,
            weights: BalancedWeights::default(),
            health: None,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_weights(mut self, weights: BalancedWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Prefer healthy agents when at least one eligible agent is healthy.
    pub fn with_health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    /// Select under the configured strategy.
    pub fn select(&self, requirements: &TaskRequirements) -> Result<Selection, RoutingError> {
        self.select_with(requirements, self.strategy)
    }

    /// Select under an explicit strategy.
    pub fn select_with(
        &self,
        requirements: &TaskRequirements,
        strategy: SelectionStrategy,
    ) -> Result<Selection, RoutingError> {
        let mut eligible = self.eligible(requirements);
        if eligible.is_empty() {
            return Err(RoutingError::NoEligibleAgent {
                required: requirements.capabilities.iter().cloned().collect(),
            });
        }

        let cheapest = eligible
            .iter()
            .map(|p| p.cost_per_1k_tokens)
            .fold(f64::INFINITY, f64::min);
        let chosen = match strategy {
            SelectionStrategy::LowestCost => eligible
                .into_iter()
                .min_by(|a, b| {
                    a.cost_per_1k_tokens
                        .total_cmp(&b.cost_per_1k_tokens)
                        .then_with(|| tie_break(a, b))
                }),
            SelectionStrategy::HighestQuality => eligible.into_iter().min_by(|a, b| {
                b.accuracy_score
                    .total_cmp(&a.accuracy_score)
                    .then_with(|| b.reliability_score.total_cmp(&a.reliability_score))
                    .then_with(|| tie_break(a, b))
            }),
            SelectionStrategy::Fastest => eligible.into_iter().min_by(|a, b| {
                b.speed_score
                    .total_cmp(&a.speed_score)
                    .then_with(|| tie_break(a, b))
            }),
            SelectionStrategy::Balanced => eligible.into_iter().min_by(|a, b| {
                self.score(b, cheapest)
                    .total
                    .total_cmp(&self.score(a, cheapest).total)
                    .then_with(|| tie_break(a, b))
            }),
            SelectionStrategy::RoundRobin => {
                eligible.sort_by(|a, b| tie_break(a, b));
                let index = self.cursor.fetch_add(1, AtomicOrdering::Relaxed) % eligible.len();
                eligible.into_iter().nth(index)
            }
        };

        let agent = chosen
            .cloned()
            .ok_or_else(|| RoutingError::NoEligibleAgent {
                required: requirements.capabilities.iter().cloned().collect(),
            })?;

        tracing::debug!(
            agent = %agent.name,
            strategy = ?strategy,
            "selected agent"
        );

        Ok(Selection {
            score: self.score(&agent, cheapest),
            estimated_cost: agent.estimate_cost(requirements.estimated_tokens),
            agent,
        })
    }

    fn eligible(&self, requirements: &TaskRequirements) -> Vec<&AgentProfile> {
        let matching: Vec<&AgentProfile> = self
            .profiles
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| p.supports_all(&requirements.capabilities))
            .filter(|p| requirements.min_accuracy.is_none_or(|min| p.accuracy_score >= min))
            .collect();

        let Some(health) = &self.health else {
            return matching;
        };
        let healthy: Vec<&AgentProfile> = matching
            .iter()
            .copied()
            .filter(|p| health.is_healthy(&p.name))
            .collect();
        if healthy.is_empty() { matching } else { healthy }
    }

    fn score(&self, profile: &AgentProfile, cheapest: f64) -> ScoreBreakdown {
        let cost = if profile.cost_per_1k_tokens <= 0.0 {
            1.0
        } else {
            (cheapest.max(0.0) / profile.cost_per_1k_tokens).clamp(0.0, 1.0)
        };
        let w = &self.weights;
        let total = w.cost * cost
            + w.quality * profile.accuracy_score
            + w.speed * profile.speed_score
            + w.reliability * profile.reliability_score;
        ScoreBreakdown {
            cost,
            quality: profile.accuracy_score,
            speed: profile.speed_score,
            reliability: profile.reliability_score,
            total,
        }
    }
}

fn tie_break(a: &AgentProfile, b: &AgentProfile) -> Ordering {
    a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name))
}
