use std::path::PathBuf;

use facegate_embed::EmbeddingError;
use thiserror::Error;

use crate::identity::Partition;

pub type Result<T, E = FacegateError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum FacegateError {
    #[error("embedding has {got} components, expected {want}")]
    InvalidDimension { got: usize, want: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("enrollment requires a name")]
    MissingIdentifier,

    #[error("'{name}' not found in {partition} partition")]
    NotFound { partition: Partition, name: String },

    #[error("result {0} not found")]
    ResultNotFound(u64),

    #[error("embedding has zero norm")]
    DegenerateVector,

    #[error("accessing {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot {} is corrupt: {reason}", path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    #[error(
        "{} is held by another facegate process (pid {}); stop it or use the HTTP API",
        path.display(),
        pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
    )]
    Locked { path: PathBuf, pid: Option<u32> },

    #[error("device: {0}")]
    Device(String),
}

impl FacegateError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Validation failures are the caller's fault and never touch shared state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimension { .. }
                | Self::InvalidEmbedding(_)
                | Self::MissingIdentifier
                | Self::DegenerateVector
        )
    }
}

impl From<EmbeddingError> for FacegateError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::InvalidDimension { got, want } => Self::InvalidDimension { got, want },
            EmbeddingError::Degenerate => Self::DegenerateVector,
            other => Self::InvalidEmbedding(other.to_string()),
        }
    }
}
