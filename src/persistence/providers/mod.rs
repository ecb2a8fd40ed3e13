pub mod memory;
pub mod surreal;

pub use memory::{InMemoryGraphStore, InMemoryVectorIndex};
pub use surreal::SurrealStore;
