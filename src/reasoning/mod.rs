//! Chain-of-graph reasoning.
//!
//! The [`ReasoningController`] runs a bounded plan → retrieve → reflect loop
//! over the hybrid retriever and finishes with citation-checked synthesis.

pub mod controller;
pub mod planner;
pub mod reflection;
pub mod synthesis;

pub use controller::{ReasoningConfig, ReasoningController};
pub use planner::{Plan, Planner};
pub use reflection::{ReflectionPolicy, Requirement, Requirements};
pub use synthesis::Synthesizer;
