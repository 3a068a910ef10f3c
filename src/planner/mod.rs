//! Planning module for tag operations.
//!
//! This module compares declared tags from the configuration with the tags
//! observed on each resource, and applies the resulting plan.

mod executor;
mod plan;

pub use executor::{ExecutionResult, PlanExecutor, ResourceResult, ResourceStatus};
pub use plan::{ResourcePlan, TagPlan};
