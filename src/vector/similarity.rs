//! Vector Similarity Functions
//!
//! Unit-normalization and inner products. Over unit vectors the inner
//! product is the cosine similarity.

/// Outcome of normalizing a vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The unit vector, or the input unchanged when it had zero norm
    pub vector: Vec<f32>,
    /// True when the input was all zeros and carries no direction
    pub degenerate: bool,
}

/// Compute dot product of two vectors
///
/// Uses unrolled loop for better CPU performance.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let len = a.len().min(b.len());
    let mut sum = 0.0f32;

    // Process 4 elements at a time (manual unrolling)
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        sum += a[idx] * b[idx];
        sum += a[idx + 1] * b[idx + 1];
        sum += a[idx + 2] * b[idx + 2];
        sum += a[idx + 3] * b[idx + 3];
    }

    for i in (chunks * 4)..len {
        sum += a[i] * b[i];
    }

    sum
}

/// L2 norm of a vector
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit L2 norm.
///
/// A zero-norm vector is returned unchanged with `degenerate` set; callers
/// decide how loudly to report it. It is never an error.
pub fn normalize(v: &[f32]) -> Normalized {
    let norm = l2_norm(v);
    if norm > 0.0 {
        Normalized {
            vector: v.iter().map(|x| x / norm).collect(),
            degenerate: false,
        }
    } else {
        Normalized {
            vector: v.to_vec(),
            degenerate: true,
        }
    }
}
