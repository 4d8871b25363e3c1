use ndarray::Array1;

use crate::error::EmbeddingError;

/// Length of every face embedding produced by the recognition model.
pub const EMBEDDING_DIM: usize = 512;

/// Face embedding with a validated length of [`EMBEDDING_DIM`].
///
/// Values are kept exactly as submitted; callers are not expected to
/// pre-normalize. Use [`Embedding::normalize`] or [`cosine_similarity`]
/// when comparing.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::InvalidDimension {
                got: values.len(),
                want: EMBEDDING_DIM,
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(Self {
            vector: Array1::from_vec(values),
        })
    }

    pub fn as_slice(&self) -> &[f32] {
        // Array1 built from a Vec is always contiguous.
        self.vector.as_slice().unwrap_or(&[])
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    /// Euclidean norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        self.vector
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt()
    }

    /// Divide every component by the Euclidean norm.
    pub fn normalize(&self) -> Result<Self, EmbeddingError> {
        let norm = self.norm();
        if norm == 0.0 {
            return Err(EmbeddingError::Degenerate);
        }
        Ok(Self {
            vector: self.vector.mapv(|x| (f64::from(x) / norm) as f32),
        })
    }

    /// Elementwise arithmetic mean of `samples`, accumulated in f64.
    pub fn mean(samples: &[Embedding]) -> Result<Self, EmbeddingError> {
        if samples.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        let mut sum = Array1::<f64>::zeros(EMBEDDING_DIM);
        for sample in samples {
            sum.zip_mut_with(&sample.vector, |acc, &x| *acc += f64::from(x));
        }
        let n = samples.len() as f64;
        Self::from_vec(sum.iter().map(|&x| (x / n) as f32).collect())
    }

    /// Fails with [`EmbeddingError::Degenerate`] for a zero-norm vector.
    pub fn ensure_usable(&self) -> Result<(), EmbeddingError> {
        if self.norm() == 0.0 {
            return Err(EmbeddingError::Degenerate);
        }
        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`: the dot product of both normalized vectors.
///
/// Fails with [`EmbeddingError::Degenerate`] if either vector has zero norm,
/// since its direction is undefined.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f32, EmbeddingError> {
    let norm_a = a.norm();
    let norm_b = b.norm();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(EmbeddingError::Degenerate);
    }

    let dot: f64 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32)
}
