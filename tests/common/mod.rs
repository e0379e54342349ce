// Shared helpers for integration tests: context construction and a
// finite-difference gradient checker for blob layers.

#![allow(dead_code)]

use rust_inner_product::blob::Blob;
use rust_inner_product::config::{InnerProductConfig, LayerConfig};
use rust_inner_product::context::ExecutionContext;
use rust_inner_product::fillers::{fill, Filler};
use rust_inner_product::layers::{InnerProductLayer, Layer};
use rust_inner_product::utils::SimpleRng;

/// GPU context, or `None` (with a note on stderr) when no adapter is present.
pub fn gpu_context() -> Option<ExecutionContext> {
    match ExecutionContext::gpu() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {}", err);
            None
        }
    }
}

/// Inner product layer with weights and bias drawn uniformly from [1, 2].
pub fn uniform_layer(num_output: usize, bias_term: bool) -> InnerProductLayer {
    let mut param = InnerProductConfig::new(num_output);
    param.bias_term = bias_term;
    param.weight_filler = Filler::Uniform { min: 1.0, max: 2.0 };
    param.bias_filler = Filler::Uniform { min: 1.0, max: 2.0 };
    InnerProductLayer::new(LayerConfig::new(param))
}

/// Bottom blob of shape (num, channels, height, width) filled with N(0, std²).
pub fn gaussian_bottom(ctx: &ExecutionContext, shape: [usize; 4], std: f32) -> Blob {
    let mut blob = Blob::new(shape[0], shape[1], shape[2], shape[3]);
    let filler = Filler::Gaussian {
        mean: 0.0,
        std,
        sparse: None,
    };
    fill(&mut blob, &filler, &mut ctx.rng()).unwrap();
    blob
}

/// Copy `values` into the data of parameter blob `index`.
pub fn set_param<L: Layer>(layer: &L, index: usize, values: &[f32]) {
    layer.blobs()[index]
        .borrow_mut()
        .mutable_cpu_data()
        .unwrap()
        .copy_from_slice(values);
}

pub fn param_diff<L: Layer>(layer: &L, index: usize) -> Vec<f32> {
    layer.blobs()[index].borrow().cpu_diff().unwrap().to_vec()
}

pub fn param_data<L: Layer>(layer: &L, index: usize) -> Vec<f32> {
    layer.blobs()[index].borrow().cpu_data().unwrap().to_vec()
}

/// Compares analytic gradients against central finite differences.
///
/// The objective is `sum_i c_i * top_i` for fixed random coefficients `c`,
/// so the top diff fed into backward is exactly `c`.
pub struct GradientChecker {
    stepsize: f32,
    threshold: f32,
    seed: u64,
}

impl GradientChecker {
    pub fn new(stepsize: f32, threshold: f32) -> Self {
        Self {
            stepsize,
            threshold,
            seed: 1701,
        }
    }

    /// Check gradients w.r.t. every bottom value and every parameter value.
    ///
    /// `layer` must already be set up for `bottom`/`top`.
    pub fn check_gradient_exhaustive<L: Layer>(
        &self,
        ctx: &ExecutionContext,
        layer: &mut L,
        bottom: &mut [Blob],
        top: &mut [Blob],
    ) {
        layer.forward(ctx, bottom, top).unwrap();
        let mut rng = SimpleRng::new(self.seed);
        let coefficients: Vec<f32> = (0..top[0].count())
            .map(|_| rng.gen_range_f32(-1.0, 1.0))
            .collect();
        top[0]
            .mutable_cpu_diff()
            .unwrap()
            .copy_from_slice(&coefficients);

        layer.backward(ctx, top, &[true], bottom).unwrap();
        let bottom_grad = bottom[0].cpu_diff().unwrap().to_vec();
        let param_grads: Vec<Vec<f32>> = (0..layer.blobs().len())
            .map(|i| param_diff(layer, i))
            .collect();

        let h = self.stepsize;
        for (i, &analytic) in bottom_grad.iter().enumerate() {
            let original = bottom[0].cpu_data().unwrap()[i];

            bottom[0].mutable_cpu_data().unwrap()[i] = original + h;
            let x_plus = bottom[0].cpu_data().unwrap()[i];
            let f_plus = Self::objective(ctx, layer, bottom, top, &coefficients);

            bottom[0].mutable_cpu_data().unwrap()[i] = original - h;
            let x_minus = bottom[0].cpu_data().unwrap()[i];
            let f_minus = Self::objective(ctx, layer, bottom, top, &coefficients);

            bottom[0].mutable_cpu_data().unwrap()[i] = original;
            let numeric = central_difference(f_plus, f_minus, x_plus, x_minus);
            self.assert_close(analytic, numeric, &format!("bottom[0][{}]", i));
        }

        for (p, grads) in param_grads.iter().enumerate() {
            for (i, &analytic) in grads.iter().enumerate() {
                let original = param_data(layer, p)[i];

                layer.blobs()[p].borrow_mut().mutable_cpu_data().unwrap()[i] = original + h;
                let x_plus = param_data(layer, p)[i];
                let f_plus = Self::objective(ctx, layer, bottom, top, &coefficients);

                layer.blobs()[p].borrow_mut().mutable_cpu_data().unwrap()[i] = original - h;
                let x_minus = param_data(layer, p)[i];
                let f_minus = Self::objective(ctx, layer, bottom, top, &coefficients);

                layer.blobs()[p].borrow_mut().mutable_cpu_data().unwrap()[i] = original;
                let numeric = central_difference(f_plus, f_minus, x_plus, x_minus);
                self.assert_close(analytic, numeric, &format!("blobs[{}][{}]", p, i));
            }
        }
    }

    fn assert_close(&self, analytic: f32, numeric: f64, what: &str) {
        let analytic = analytic as f64;
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        let threshold = self.threshold as f64 * scale;
        assert!(
            (analytic - numeric).abs() <= threshold,
            "{}: analytic {} vs numeric {} (threshold {})",
            what,
            analytic,
            numeric,
            threshold
        );
    }

    fn objective<L: Layer>(
        ctx: &ExecutionContext,
        layer: &L,
        bottom: &[Blob],
        top: &mut [Blob],
        coefficients: &[f32],
    ) -> f64 {
        layer.forward(ctx, bottom, top).unwrap();
        let values = top[0].cpu_data().unwrap();
        let total: f64 = values
            .iter()
            .zip(coefficients)
            .map(|(&v, &c)| v as f64 * c as f64)
            .sum();
        total
    }
}

// Uses the values actually stored after perturbation, not the nominal step.
fn central_difference(f_plus: f64, f_minus: f64, x_plus: f32, x_minus: f32) -> f64 {
    (f_plus - f_minus) / (x_plus as f64 - x_minus as f64)
}
