//! Core domain types for EvolvAI.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the execution plan schema, validation results, the project
//! area model, and structured constraint errors. Everything here can be
//! used from any layer of the system.

mod area;
mod constraint;
mod plan;
mod validation;

pub use area::{AppliedArea, Confidence, ProjectArea, QueryRouting};
pub use constraint::{ConstraintError, ConstraintViolation};
pub use plan::{
    ExecutionLimits, ExecutionPlan, PlanBoundsError, RollbackKind, RollbackStrategy,
    ValidationConfig,
};
pub use validation::{ValidationResult, ValidationViolation, ViolationSeverity};
