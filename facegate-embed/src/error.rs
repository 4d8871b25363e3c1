use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding has {got} components, expected {want}")]
    InvalidDimension { got: usize, want: usize },

    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },

    #[error("embedding has zero norm")]
    Degenerate,

    #[error("cannot average an empty set of embeddings")]
    Empty,
}
