pub mod embedding;
pub mod error;

pub use embedding::{cosine_similarity, Embedding, EMBEDDING_DIM};
pub use error::EmbeddingError;
