//! Embedding generation, the persistent document index and nearest-neighbour
//! retrieval over it.

pub mod embedding;
pub mod search;
pub mod similarity;
pub mod storage;

pub use embedding::{Embedder, OllamaEmbedder};
pub use search::{rank_entries, select_entries, RetrievalMode, Retriever};
pub use similarity::calculate_direct_similarity;
pub use storage::DocumentStore;
