//! MedGraph RAG
//!
//! Hybrid retrieval over a biomedical knowledge graph with a bounded,
//! self-reflective chain-of-graph reasoning loop.
//!
//! # Architecture
//!
//! - **Retrieval**: vector similarity, graph neighborhood and community
//!   lookup run concurrently and merge into one ranked evidence list
//! - **Reasoning**: an explicit plan → retrieve → reflect → synthesize state
//!   machine with a hop budget and cancellation at every transition
//! - **Synthesis**: every answer sentence must cite gathered evidence
//!
//! # Modules
//!
//! - [`domain`]: graph, evidence and reasoning value types
//! - [`persistence`]: graph store and vector index adapters
//! - [`rag`]: entity index, keyword extraction, embeddings, communities, retrieval
//! - [`llm`]: language-model client and prompts
//! - [`reasoning`]: planner, reflection, synthesis and the controller
//! - [`engine`]: wiring for the binary and integration tests

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod llm;
pub mod persistence;
pub mod rag;
pub mod reasoning;
pub mod telemetry;

pub use engine::Engine;
pub use error::{ReasoningError, RetrievalError};
