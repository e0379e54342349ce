//! End-to-end tests for the rust_inner_product library
//!
//! This file drives the public API the way a caller would:
//! - configuration -> execution context -> layer
//! - setup, forward, backward and the configured weight constraint
//! - one hand-written gradient step through shared parameters

use approx::assert_relative_eq;
use rust_inner_product::config::parse_config;
use rust_inner_product::{Blob, ExecutionContext, InnerProductLayer, Layer};

const CONFIG: &str = r#"{
  "mode": "cpu",
  "seed": 42,
  "layer": {
    "name": "ip",
    "inner_product_param": {
      "num_output": 3,
      "weight_filler": { "type": "uniform", "min": -1.0, "max": 1.0 },
      "bias_filler": { "type": "constant", "value": 0.5 },
      "weight_constraint": { "type": "max_norm", "max_norm": 0.1 }
    }
  }
}"#;

fn build() -> (ExecutionContext, InnerProductLayer, Vec<Blob>, Vec<Blob>) {
    let config = parse_config(CONFIG).unwrap();
    let ctx = ExecutionContext::from_config(&config).unwrap();
    let mut layer = InnerProductLayer::new(config.layer);

    let mut input = Blob::new(4, 2, 1, 1);
    input
        .mutable_cpu_data()
        .unwrap()
        .copy_from_slice(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, -1.0, 2.0]);
    let bottom = vec![input];
    let mut top = vec![Blob::default()];
    layer.setup(&ctx, &bottom, &mut top).unwrap();
    (ctx, layer, bottom, top)
}

#[test]
fn test_same_seed_gives_same_parameters() {
    let (_, first, _, _) = build();
    let (_, second, _, _) = build();

    let a = first.blobs()[0].borrow().cpu_data().unwrap().to_vec();
    let b = second.blobs()[0].borrow().cpu_data().unwrap().to_vec();
    assert_eq!(a, b);
    assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
}

#[test]
fn test_forward_uses_bias_broadcast() {
    let (ctx, layer, bottom, mut top) = build();
    layer.forward(&ctx, &bottom, &mut top).unwrap();

    let weight = layer.blobs()[0].borrow().cpu_data().unwrap().to_vec();
    let out = top[0].cpu_data().unwrap();
    // First example is (1, 0): output j = W[j][0] + 0.5
    for j in 0..3 {
        assert_relative_eq!(out[j], weight[j * 2] + 0.5, epsilon = 1e-6);
    }
}

#[test]
fn test_training_step_then_constraint() {
    let (ctx, mut layer, mut bottom, mut top) = build();
    layer.forward(&ctx, &bottom, &mut top).unwrap();
    top[0].mutable_cpu_diff().unwrap().fill(1.0);
    layer.backward(&ctx, &top, &[false], &mut bottom).unwrap();

    // Plain SGD step on every parameter blob
    for blob in layer.blobs() {
        let mut blob = blob.borrow_mut();
        let diff = blob.cpu_diff().unwrap().to_vec();
        for (value, grad) in blob.mutable_cpu_data().unwrap().iter_mut().zip(diff) {
            *value -= 0.1 * grad;
        }
    }
    // Bias gradient is the column sum of ones over 4 examples
    for &b in layer.blobs()[1].borrow().cpu_data().unwrap().iter() {
        assert_relative_eq!(b, 0.5 - 0.4, epsilon = 1e-6);
    }

    layer.apply_weight_constraint(&ctx).unwrap();
    let weight = layer.blobs()[0].borrow().cpu_data().unwrap().to_vec();
    for c in 0..2 {
        let norm = (0..3).map(|r| weight[r * 2 + c].powi(2)).sum::<f32>().sqrt();
        assert!(norm <= 0.1 + 1e-6, "column {} norm {}", c, norm);
    }
}
