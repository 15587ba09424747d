//! Agent health, selection, budget, and routing.

pub mod budget;
pub mod health;
pub mod router;
pub mod selector;

pub use budget::{BudgetConfig, BudgetStatus, BudgetTracker};
pub use health::{FailoverHistory, HealthTracker};
pub use router::{AgentRouter, DecisionKind, RoutingDecision};
pub use selector::{AgentSelector, BalancedWeights, RoutingError, ScoreBreakdown, Selection};
