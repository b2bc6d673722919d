//! Core types and traits for the confsearch configuration optimizer.
//!
//! This crate defines the external seams of the optimizer:
//! - [`ConfigurationGraph`]: the incrementally generated search space
//! - [`Evaluator`]: the benchmark that scores a complete configuration
//! - [`Candidate`]: an evaluated complete configuration
//! - [`OptimizerError`]: the error taxonomy shared by all components
//!
//! The concrete search-space definition and scoring function live outside
//! this workspace; everything here is deliberately small and object-safe
//! where values have to cross component boundaries.

pub mod candidate;
pub mod error;
pub mod graph;

pub use candidate::Candidate;
pub use error::{OptimizerError, Result};
pub use graph::{ConfigurationGraph, Evaluation, EvaluationError, Evaluator};
