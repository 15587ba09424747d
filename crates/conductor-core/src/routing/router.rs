//! Budget-aware routing on top of the selector.
//!
//! The selector knows nothing about money and the budget tracker knows
//! nothing about agents. The router runs the normal strategy, and if the pick
//! would overrun the remaining budget it re-selects under `LowestCost`.

use std::sync::Arc;

use conductor_types::agent::{AgentProfile, SelectionStrategy, TaskRequirements};
use serde::Serialize;

use super::budget::{BudgetStatus, BudgetTracker};
use super::selector::{AgentSelector, RoutingError, ScoreBreakdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    UseSelected,
    UseFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub kind: DecisionKind,
    pub agent: AgentProfile,
    pub score: ScoreBreakdown,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct AgentRouter {
    selector: AgentSelector,
    budget: Arc<BudgetTracker>,
}

impl AgentRouter {
    pub fn new(selector: AgentSelector, budget: Arc<BudgetTracker>) -> Self {
        Self { selector, budget }
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn route(&self, requirements: &TaskRequirements) -> Result<RoutingDecision, RoutingError> {
        let selection = self.selector.select(requirements)?;
        if !self.budget.would_exceed(selection.estimated_cost) {
            return Ok(RoutingDecision {
                kind: DecisionKind::UseSelected,
                agent: selection.agent,
                score: selection.score,
                estimated_cost: selection.estimated_cost,
                reason: None,
            });
        }

        let fallback = self
            .selector
            .select_with(requirements, SelectionStrategy::LowestCost)?;
        let reason = format!(
            "estimated cost {:.4} of '{}' exceeds remaining budget {:.4}",
            selection.estimated_cost,
            selection.agent.name,
            self.budget.remaining()
        );
        tracing::info!(
            selected = %selection.agent.name,
            fallback = %fallback.agent.name,
            %reason,
            "routing to budget fallback"
        );

        Ok(RoutingDecision {
            kind: DecisionKind::UseFallback,
            agent: fallback.agent,
            score: fallback.score,
            estimated_cost: fallback.estimated_cost,
            reason: Some(reason),
        })
    }

    /// Commit the actual cost of a routed call.
    pub fn record_spend(&self, cost: f64) -> BudgetStatus {
        self.budget.record_spend(cost)
    }
}
