//! Fully connected (inner product) layer with interchangeable math backends
//!
//! The layer follows a setup / forward / backward lifecycle over 4-D blobs and
//! dispatches every numerical step through a [`math::MathBackend`]: BLAS on the
//! host, or WGSL compute kernels through `wgpu` with the `wgpu` feature.
//!
//! # Modules
//!
//! - `blob`: shaped tensors with host/device synchronized storage
//! - `math`: GEMM, GEMV, scale and norm providers (CPU and GPU)
//! - `context`: execution context selecting the backend and owning the filler RNG
//! - `fillers`: parameter initializers
//! - `layers`: the `Layer` trait and `InnerProductLayer`
//! - `config`: JSON run configuration
//! - `utils`: deterministic RNG

extern crate blas_src;

pub mod blob;
pub mod config;
pub mod context;
pub mod error;
pub mod fillers;
pub mod layers;
pub mod math;
pub mod utils;

pub use blob::{Blob, SharedBlob};
pub use context::{ExecutionContext, ExecutionMode};
pub use error::{Error, Result};
pub use layers::{InnerProductLayer, Layer};
