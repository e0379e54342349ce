//! Inner product (fully connected) layer
//!
//! Treats the single bottom blob as an M × K matrix (M examples of K features)
//! and computes `top = bottom × Wᵀ + 1·b` with a weight W of shape N × K and an
//! optional bias b of length N. The bias is broadcast over the batch with a
//! GEMM against an all-ones "bias multiplier" vector of length M.

use tracing::{debug, info, trace};

use crate::blob::{Blob, SharedBlob, SyncedMemory};
use crate::config::{LayerConfig, NormConstraint};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::fillers::fill;
use crate::layers::Layer;
use crate::math::Transpose;

/// Guards the rescale division for all-zero columns.
const NORM_EPSILON: f32 = 1e-7;

/// Fully connected layer on blobs.
///
/// Parameters (`blobs()`): index 0 is the weight with shape (1, 1, N, K);
/// index 1 is the bias with shape (1, 1, 1, N) when `bias_term` is set.
///
/// # Example
///
/// ```
/// use rust_inner_product::blob::Blob;
/// use rust_inner_product::config::{InnerProductConfig, LayerConfig};
/// use rust_inner_product::context::ExecutionContext;
/// use rust_inner_product::layers::{InnerProductLayer, Layer};
///
/// let ctx = ExecutionContext::cpu();
/// let mut layer = InnerProductLayer::new(LayerConfig::new(InnerProductConfig::new(3)));
/// let bottom = vec![Blob::new(2, 4, 1, 1)];
/// let mut top = vec![Blob::default()];
///
/// layer.setup(&ctx, &bottom, &mut top).unwrap();
/// assert_eq!(top[0].shape(), [2, 3, 1, 1]);
/// assert_eq!(layer.blobs().len(), 2);
/// ```
#[derive(Debug)]
pub struct InnerProductLayer {
    config: LayerConfig,
    m: usize,
    k: usize,
    n: usize,
    bias_term: bool,
    blobs: Vec<SharedBlob>,
    bias_multiplier: Option<SyncedMemory>,
}

impl InnerProductLayer {
    /// Creates an inner product layer that has not been set up yet.
    ///
    /// # Arguments
    ///
    /// * `config` - Layer name and inner product parameters (N, bias flag,
    ///   fillers, weight constraint)
    ///
    /// # Returns
    ///
    /// A layer with M = K = N = 0 and no parameters; `setup` sizes it from the
    /// first bottom blob.
    pub fn new(config: LayerConfig) -> Self {
        let bias_term = config.inner_product_param.bias_term;
        Self {
            config,
            m: 0,
            k: 0,
            n: 0,
            bias_term,
            blobs: Vec::new(),
            bias_multiplier: None,
        }
    }

    /// Pre-populate the parameter store, e.g. with blobs owned by another layer.
    ///
    /// `setup` then keeps them instead of allocating and filling new ones.
    pub fn set_blobs(&mut self, blobs: Vec<SharedBlob>) {
        self.blobs = blobs;
    }

    /// Batch size seen at the last setup.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Features per example.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of outputs.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn bias_term(&self) -> bool {
        self.bias_term
    }

    /// The all-ones vector of length M, present after setup when bias is enabled.
    pub fn bias_multiplier(&self) -> Option<&SyncedMemory> {
        self.bias_multiplier.as_ref()
    }

    fn weight(&self) -> Result<&SharedBlob> {
        self.blobs
            .first()
            .ok_or_else(|| Error::Config("weights are not initialized; call setup first".to_string()))
    }

    fn bias(&self) -> Result<(&SharedBlob, &SyncedMemory)> {
        match (self.blobs.get(1), self.bias_multiplier.as_ref()) {
            (Some(bias), Some(multiplier)) => Ok((bias, multiplier)),
            _ => Err(Error::Config(
                "bias is not initialized; call setup first".to_string(),
            )),
        }
    }

    // Validates the parameter store against an (N, K) weight and optional bias.
    fn check_existing_blobs(&self, n: usize, k: usize, bias_term: bool) -> Result<()> {
        let expected = if bias_term { 2 } else { 1 };
        if self.blobs.len() != expected {
            return Err(Error::Shape(format!(
                "parameter store holds {} blobs but {} are required",
                self.blobs.len(),
                expected
            )));
        }

        let weight = self.blobs[0].borrow();
        if weight.height() != n || weight.width() != k || weight.count() != n * k {
            return Err(Error::Shape(format!(
                "existing weight has shape {:?}, expected (1, 1, {}, {})",
                weight.shape(),
                n,
                k
            )));
        }
        if bias_term {
            let bias = self.blobs[1].borrow();
            if bias.count() != n {
                return Err(Error::Shape(format!(
                    "existing bias has shape {:?}, expected (1, 1, 1, {})",
                    bias.shape(),
                    n
                )));
            }
        }
        Ok(())
    }

    // Shared parameters can be reshaped by their owner between calls.
    fn check_params(&self) -> Result<()> {
        self.check_existing_blobs(self.n, self.k, self.bias_term)
    }

    fn check_input(&self, input: &Blob) -> Result<()> {
        if input.num() != self.m || input.count() != self.m * self.k {
            return Err(Error::Shape(format!(
                "bottom has shape {:?} but the layer was set up for {} x {}",
                input.shape(),
                self.m,
                self.k
            )));
        }
        Ok(())
    }

    /// Rescale every weight column whose L2 norm exceeds `max_norm` down to `max_norm`.
    ///
    /// A column is the K-strided slice `W[0..N][i]`, one per input feature.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Backend that computes the norms and performs the scaling
    /// * `max_norm` - Upper bound on each column norm
    ///
    /// # Errors
    ///
    /// Fails when the layer has no weight yet or the backend rejects an operand.
    pub fn normalize_weights(&self, ctx: &ExecutionContext, max_norm: f32) -> Result<()> {
        self.rescale_columns(ctx, |norm| {
            (norm > max_norm).then(|| max_norm / (norm + NORM_EPSILON))
        })
    }

    /// Rescale every weight column whose L2 norm lies outside
    /// `[min_norm, max_norm]` to `target_norm`.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Backend that computes the norms and performs the scaling
    /// * `min_norm`, `max_norm` - Band of norms that are left untouched
    /// * `target_norm` - Norm given to every column outside the band
    pub fn normalize_weights_banded(
        &self,
        ctx: &ExecutionContext,
        min_norm: f32,
        max_norm: f32,
        target_norm: f32,
    ) -> Result<()> {
        self.rescale_columns(ctx, |norm| {
            (norm > max_norm || norm < min_norm).then(|| target_norm / (norm + NORM_EPSILON))
        })
    }

    /// Apply the configured `weight_constraint`, if any.
    ///
    /// # Returns
    ///
    /// `Ok(())` without touching the weight when no constraint is configured.
    pub fn apply_weight_constraint(&self, ctx: &ExecutionContext) -> Result<()> {
        match self.config.inner_product_param.weight_constraint {
            Some(NormConstraint::MaxNorm { max_norm }) => self.normalize_weights(ctx, max_norm),
            Some(NormConstraint::NormBand {
                min_norm,
                max_norm,
                target_norm,
            }) => self.normalize_weights_banded(ctx, min_norm, max_norm, target_norm),
            None => Ok(()),
        }
    }

    // Column i of the (N, K) weight: `rows` values starting at i, `cols` apart.
    fn rescale_columns<F>(&self, ctx: &ExecutionContext, scale_for: F) -> Result<()>
    where
        F: Fn(f32) -> Option<f32>,
    {
        let math = ctx.math();
        let mut weight = self.weight()?.borrow_mut();
        let rows = weight.height();
        let cols = weight.width();
        let off = weight.offset(0, 0, 0, 1);

        for i in 0..cols {
            let norm = math.nrm2(rows, weight.data(), i * off, cols)?;
            if let Some(scale) = scale_for(norm) {
                trace!(column = i, norm, scale, "rescaling weight column");
                math.scal(rows, scale, weight.data_mut(), i * off, cols)?;
            }
        }
        Ok(())
    }
}

impl Layer for InnerProductLayer {
    fn layer_type(&self) -> &'static str {
        "InnerProduct"
    }

    fn setup(&mut self, ctx: &ExecutionContext, bottom: &[Blob], top: &mut [Blob]) -> Result<()> {
        self.check_blob_counts(bottom, top)?;

        let param = &self.config.inner_product_param;
        if param.num_output == 0 {
            return Err(Error::Config("num_output must be positive".to_string()));
        }
        let input = &bottom[0];
        if input.num() == 0 {
            return Err(Error::Shape("bottom blob has no examples".to_string()));
        }

        let n = param.num_output;
        let bias_term = param.bias_term;
        let m = input.num();
        let k = input.count() / m;
        debug!(
            layer = %self.config.name,
            m,
            k,
            n,
            backend = ctx.math().name(),
            "inner product setup"
        );

        // Nothing is committed until the parameter store is known to fit.
        let fresh = if self.blobs.is_empty() {
            let mut rng = ctx.rng();
            let mut weight = Blob::new(1, 1, n, k);
            fill(&mut weight, &param.weight_filler, &mut rng)?;
            let mut fresh = vec![weight.into_shared()];
            if bias_term {
                let mut bias = Blob::new(1, 1, 1, n);
                fill(&mut bias, &param.bias_filler, &mut rng)?;
                fresh.push(bias.into_shared());
            }
            Some(fresh)
        } else {
            info!(layer = %self.config.name, "Skipping parameter initialization");
            self.check_existing_blobs(n, k, bias_term)?;
            None
        };

        if let Some(fresh) = fresh {
            self.blobs = fresh;
        }
        self.m = m;
        self.k = k;
        self.n = n;
        self.bias_term = bias_term;
        top[0].reshape(m, n, 1, 1);
        self.bias_multiplier = bias_term.then(|| SyncedMemory::from_vec(vec![1.0; m]));
        Ok(())
    }

    fn forward(&self, ctx: &ExecutionContext, bottom: &[Blob], top: &mut [Blob]) -> Result<f32> {
        self.check_blob_counts(bottom, top)?;
        self.check_input(&bottom[0])?;
        self.check_params()?;
        let math = ctx.math();
        let weight = self.weight()?.borrow();

        math.gemm(
            Transpose::NoTrans,
            Transpose::Trans,
            self.m,
            self.n,
            self.k,
            1.0,
            bottom[0].data(),
            weight.data(),
            0.0,
            top[0].data_mut(),
        )?;

        if self.bias_term {
            let (bias, multiplier) = self.bias()?;
            let bias = bias.borrow();
            math.gemm(
                Transpose::NoTrans,
                Transpose::NoTrans,
                self.m,
                self.n,
                1,
                1.0,
                multiplier,
                bias.data(),
                1.0,
                top[0].data_mut(),
            )?;
        }
        Ok(0.0)
    }

    fn backward(
        &mut self,
        ctx: &ExecutionContext,
        top: &[Blob],
        propagate_down: &[bool],
        bottom: &mut [Blob],
    ) -> Result<()> {
        self.check_blob_counts(bottom, top)?;
        self.check_input(&bottom[0])?;
        self.check_params()?;
        let propagate = *propagate_down.first().ok_or_else(|| {
            Error::Shape("propagate_down needs one flag per bottom blob".to_string())
        })?;
        let math = ctx.math();
        let top_diff = top[0].diff();

        {
            let mut weight = self.weight()?.borrow_mut();
            math.gemm(
                Transpose::Trans,
                Transpose::NoTrans,
                self.n,
                self.k,
                self.m,
                1.0,
                top_diff,
                bottom[0].data(),
                0.0,
                weight.diff_mut(),
            )?;
        }

        if self.bias_term {
            let (bias, multiplier) = self.bias()?;
            let mut bias = bias.borrow_mut();
            math.gemv(
                Transpose::Trans,
                self.m,
                self.n,
                1.0,
                top_diff,
                multiplier,
                0.0,
                bias.diff_mut(),
            )?;
        }

        if propagate {
            let weight = self.weight()?.borrow();
            math.gemm(
                Transpose::NoTrans,
                Transpose::NoTrans,
                self.m,
                self.k,
                self.n,
                1.0,
                top_diff,
                weight.data(),
                0.0,
                bottom[0].diff_mut(),
            )?;
        }
        Ok(())
    }

    fn blobs(&self) -> &[SharedBlob] {
        &self.blobs
    }
}
