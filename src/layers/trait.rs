//! Layer trait definition
//!
//! This module defines the lifecycle every blob-based layer follows: `setup`
//! once per input shape, then `forward` and `backward` as often as needed.

use crate::blob::{Blob, SharedBlob};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Core trait for layers operating on [`Blob`]s.
///
/// Layers read `bottom` blobs and write `top` blobs. Learnable parameters live
/// in [`Layer::blobs`] as shared handles so several layers can own the same
/// weights.
///
/// # Example
///
/// ```ignore
/// layer.setup(&ctx, &bottom, &mut top)?;
/// layer.forward(&ctx, &bottom, &mut top)?;
/// // fill top[0]'s diff with the loss gradient, then
/// layer.backward(&ctx, &top, &[true], &mut bottom)?;
/// ```
pub trait Layer {
    /// Layer type name used in logs and errors.
    fn layer_type(&self) -> &'static str;

    /// Number of bottom blobs the layer requires.
    fn exact_num_bottom_blobs(&self) -> usize {
        1
    }

    /// Number of top blobs the layer produces.
    fn exact_num_top_blobs(&self) -> usize {
        1
    }

    /// Derive dimensions from `bottom`, shape `top` and create parameters.
    ///
    /// Calling `setup` again with a different bottom shape re-derives the
    /// dimensions; existing parameters are kept.
    fn setup(&mut self, ctx: &ExecutionContext, bottom: &[Blob], top: &mut [Blob]) -> Result<()>;

    /// Compute `top` data from `bottom` data.
    ///
    /// Returns the layer's loss contribution (zero for non-loss layers).
    fn forward(&self, ctx: &ExecutionContext, bottom: &[Blob], top: &mut [Blob]) -> Result<f32>;

    /// Compute parameter gradients and, where `propagate_down` is set, `bottom` diffs
    /// from the `top` diffs.
    ///
    /// Gradients are overwritten, not accumulated.
    fn backward(
        &mut self,
        ctx: &ExecutionContext,
        top: &[Blob],
        propagate_down: &[bool],
        bottom: &mut [Blob],
    ) -> Result<()>;

    /// Learnable parameter blobs.
    fn blobs(&self) -> &[SharedBlob];

    /// Total count of learnable values.
    fn parameter_count(&self) -> usize {
        self.blobs().iter().map(|blob| blob.borrow().count()).sum()
    }

    /// Verify the bottom and top blob counts before setup.
    fn check_blob_counts(&self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let expected = self.exact_num_bottom_blobs();
        if bottom.len() != expected {
            return Err(Error::BlobCount {
                layer: self.layer_type(),
                which: "bottom",
                expected,
                actual: bottom.len(),
            });
        }
        let expected = self.exact_num_top_blobs();
        if top.len() != expected {
            return Err(Error::BlobCount {
                layer: self.layer_type(),
                which: "top",
                expected,
                actual: top.len(),
            });
        }
        Ok(())
    }
}
