pub mod audit;
pub mod config;
pub mod device;
pub mod enroll;
pub mod error;
pub mod identity;
pub mod lock;
pub mod matcher;
pub mod relay;
pub mod server;
pub mod service;
pub mod storage;

// Re-export embedding types for convenience
pub use facegate_embed::{cosine_similarity, Embedding, EmbeddingError, EMBEDDING_DIM};

pub use error::{FacegateError, Result};
pub use identity::Partition;
pub use service::AccessService;
