//! Planning module.
//!
//! Computes the diff between declarations and recorded state, lowers it to
//! an ordered execution plan, and executes that plan with bounded
//! parallelism.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ActionOutcome, ActionState, ExecutionReport, PlanExecutor};
pub use plan::{ActionType, ExecutionPlan, PlannedAction};
