/**
 * Embedding Contract Module
 *
 * The core never generates embeddings; it consumes a pluggable provider
 * and fixes the two interchange representations:
 *
 * - on HTTP, a vector travels as a JSON array of numbers of length D
 * - on disk (embedded store), the same vector is `4*D` bytes of
 *   little-endian IEEE-754 f32, the canonical local interchange form
 *
 * `EMBEDDING_DIM` matches the bundled all-MiniLM-L6-v2 model; providers
 * with another dimension declare it through `dimension()` and every store
 * enforces one dimension per database.
 */

use crate::error::{Error, Result};

/// Standard embedding dimension (matches all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Pluggable text-to-vector function. Implementations may block (model
/// inference, HTTP call); the façade invokes them from async context.
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed output dimension; every vector returned has this length.
    fn dimension(&self) -> usize;

    /// Vectorize one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Serialize a vector to the canonical on-disk blob: little-endian f32,
/// `4 * len` bytes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deserialize a canonical blob back into a vector. A length that is not a
/// multiple of 4, or that disagrees with `expected_dim`, is an integrity
/// failure, never silently truncated.
pub fn vector_from_blob(blob: &[u8], expected_dim: usize) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::Integrity(format!(
            "embedding blob of {} bytes is not a whole number of f32s",
            blob.len()
        )));
    }
    let dim = blob.len() / 4;
    if dim != expected_dim {
        return Err(Error::Integrity(format!(
            "embedding blob holds {} dimensions, store is configured for {}",
            dim, expected_dim
        )));
    }
    let mut vector = Vec::with_capacity(dim);
    for chunk in blob.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vector)
}

/// Deterministic token-hash embedding. Not a model: it projects each
/// lowercase alphanumeric token into a hashed bucket and L2-normalizes, so
/// texts sharing tokens get positive cosine. Useful for tests and offline
/// smoke runs where no real model is wired in.
pub struct HashedEmbedding {
    dim: usize,
}

impl HashedEmbedding {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashedEmbedding {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl EmbeddingProvider for HashedEmbedding {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            // FNV-1a over the lowercased token
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for b in token.to_lowercase().bytes() {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            vector[(hash % self.dim as u64) as usize] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}
