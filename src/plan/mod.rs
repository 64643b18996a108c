// src/plan/mod.rs

//! Execution plans: the unit of human review.
//!
//! - [`model`] defines `ExecutionPlan`, `PlanSpec`, and the remote context.
//! - [`validate`] produces advisory warnings for a proposed plan.

pub mod model;
pub mod validate;

pub use model::{
    ExecutionContext, ExecutionPlan, PathMapping, PlanSpec, PlanStatus, ResourceDirectives,
};
pub use validate::validate;
