//! Blob-based layers
//!
//! This module provides the Layer trait and the fully connected layer built on it.

mod r#trait;
pub mod inner_product;

// Re-export the Layer trait for convenience
pub use inner_product::InnerProductLayer;
pub use r#trait::Layer;
