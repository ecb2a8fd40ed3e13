//! Hybrid retrieval over the knowledge graph.
//!
//! - [`entity_index`]: surface form → entity id resolution
//! - [`extraction`]: keyword extraction strategies
//! - [`embedding`]: text embedders
//! - [`community`]: Louvain detection, summaries and the community table
//! - [`retrieval`]: the three-branch hybrid retriever

pub mod community;
pub mod embedding;
pub mod entity_index;
pub mod extraction;
pub mod retrieval;

pub use community::{CommunityDetector, CommunityMatch, CommunityTable};
pub use embedding::{Embedder, FastEmbedder, HashingEmbedder};
pub use entity_index::EntityIndex;
pub use extraction::{KeywordExtractor, LexicalKeywordExtractor, LlmKeywordExtractor};
pub use retrieval::{HybridRetriever, HybridRetrieverConfig, Retrieval};
