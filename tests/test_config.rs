//! Tests for run configuration parsing
//!
//! This file tests the config module including:
//! - Loading the sample config files
//! - Defaults for omitted fields
//! - Filler and constraint variants
//! - Validation and malformed input
//! - Building an execution context from a config

use std::io::Write;

use rust_inner_product::config::{load_config, parse_config, NormConstraint};
use rust_inner_product::context::{ExecutionContext, ExecutionMode};
use rust_inner_product::error::Error;
use rust_inner_product::fillers::Filler;
use tempfile::NamedTempFile;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// ============================================================================
// Sample Config Files
// ============================================================================

mod sample_config_tests {
    use super::*;

    #[test]
    fn test_load_cpu_config() {
        let config = load_config("config/ip_cpu.json").expect("Failed to load cpu config");

        assert_eq!(config.mode, ExecutionMode::Cpu);
        assert_eq!(config.seed, Some(1701));
        assert_eq!(config.layer.name, "ip1");
        let param = &config.layer.inner_product_param;
        assert_eq!(param.num_output, 10);
        assert!(param.bias_term);
        assert_eq!(
            param.weight_filler,
            Filler::Gaussian {
                mean: 0.0,
                std: 0.01,
                sparse: None
            }
        );
        assert_eq!(param.bias_filler, Filler::Constant { value: 0.1 });
        assert_eq!(
            param.weight_constraint,
            Some(NormConstraint::MaxNorm { max_norm: 3.0 })
        );
    }

    #[test]
    fn test_load_gpu_band_config() {
        let config = load_config("config/ip_gpu_band.json").expect("Failed to load band config");

        assert_eq!(config.mode, ExecutionMode::Gpu);
        assert_eq!(config.seed, None);
        let param = &config.layer.inner_product_param;
        assert!(!param.bias_term);
        assert_eq!(param.weight_filler, Filler::Xavier);
        assert_eq!(
            param.weight_constraint,
            Some(NormConstraint::NormBand {
                min_norm: 0.5,
                max_norm: 2.0,
                target_norm: 1.0
            })
        );
    }
}

// ============================================================================
// Defaults
// ============================================================================

mod default_tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let file = write_temp(r#"{ "layer": { "inner_product_param": { "num_output": 3 } } }"#);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.mode, ExecutionMode::Cpu);
        assert_eq!(config.seed, None);
        assert_eq!(config.layer.name, "");
        let param = &config.layer.inner_product_param;
        assert!(param.bias_term);
        assert_eq!(param.weight_filler, Filler::Constant { value: 0.0 });
        assert_eq!(param.bias_filler, Filler::Constant { value: 0.0 });
        assert_eq!(param.weight_constraint, None);
    }

    #[test]
    fn test_mode_is_case_insensitive() {
        let config = parse_config(
            r#"{ "mode": "GPU", "layer": { "inner_product_param": { "num_output": 3 } } }"#,
        )
        .unwrap();
        assert_eq!(config.mode, ExecutionMode::Gpu);
        assert_eq!(config.mode, "Gpu".parse::<ExecutionMode>().unwrap());
    }

    #[test]
    fn test_sparse_gaussian_filler() {
        let config = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 3,
                "weight_filler": { "type": "gaussian", "std": 0.5, "sparse": 2 }
            } } }"#,
        )
        .unwrap();

        assert_eq!(
            config.layer.inner_product_param.weight_filler,
            Filler::Gaussian {
                mean: 0.0,
                std: 0.5,
                sparse: Some(2)
            }
        );
    }
}

// ============================================================================
// Error Handling Tests
// ============================================================================

mod error_handling_tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = load_config("nonexistent_config.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_malformed_json() {
        let file = write_temp("not valid json at all");
        assert!(matches!(load_config(file.path()), Err(Error::Json(_))));
    }

    #[test]
    fn test_empty_json_object() {
        let file = write_temp("{}");
        assert!(load_config(file.path()).is_err(), "layer is required");
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = parse_config(
            r#"{ "mode": "tpu", "layer": { "inner_product_param": { "num_output": 3 } } }"#,
        );
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_unknown_mode_message_names_the_mode() {
        let err = parse_config(
            r#"{ "mode": "tpu", "layer": { "inner_product_param": { "num_output": 3 } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tpu"), "unexpected message: {}", err);
    }

    #[test]
    fn test_misspelled_layer_option_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": { "num_output": 3, "bias_trem": false } } }"#,
        );
        assert!(matches!(result, Err(Error::Json(_))));

        let result = parse_config(
            r#"{ "layer": { "nmae": "ip", "inner_product_param": { "num_output": 3 } } }"#,
        );
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_misspelled_filler_option_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 2,
                "weight_filler": { "type": "gaussian", "stdev": 0.1 }
            } } }"#,
        );
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_zero_outputs_rejected() {
        let result =
            parse_config(r#"{ "layer": { "inner_product_param": { "num_output": 0 } } }"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_inverted_uniform_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 2,
                "weight_filler": { "type": "uniform", "min": 1.0, "max": -1.0 }
            } } }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_non_positive_std_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 2,
                "weight_filler": { "type": "gaussian", "std": 0.0 }
            } } }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_inverted_norm_band_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 2,
                "weight_constraint": {
                    "type": "norm_band", "min_norm": 3.0, "max_norm": 1.0, "target_norm": 2.0
                }
            } } }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_negative_max_norm_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 2,
                "weight_constraint": { "type": "max_norm", "max_norm": -1.0 }
            } } }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_filler_rejected() {
        let result = parse_config(
            r#"{ "layer": { "inner_product_param": {
                "num_output": 2,
                "weight_filler": { "type": "msra" }
            } } }"#,
        );
        assert!(matches!(result, Err(Error::Json(_))));
    }
}

// ============================================================================
// Execution Context Tests
// ============================================================================

mod context_tests {
    use super::*;

    #[test]
    fn test_context_from_cpu_config() {
        let config = load_config("config/ip_cpu.json").unwrap();
        let ctx = ExecutionContext::from_config(&config).unwrap();

        assert_eq!(ctx.mode(), ExecutionMode::Cpu);
        let mut expected = rust_inner_product::utils::SimpleRng::new(1701);
        assert_eq!(ctx.rng().next_u32(), expected.next_u32());
    }

    #[test]
    fn test_context_from_gpu_config() {
        let config = load_config("config/ip_gpu_band.json").unwrap();
        match ExecutionContext::from_config(&config) {
            Ok(ctx) => assert_eq!(ctx.mode(), ExecutionMode::Gpu),
            Err(err) => assert!(matches!(err, Error::Device(_))),
        }
    }
}
