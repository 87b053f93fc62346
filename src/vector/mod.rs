//! Vector Module
//!
//! Normalization and inner-product primitives over embedding vectors.

mod similarity;

pub use similarity::{dot_product, l2_norm, normalize, Normalized};
