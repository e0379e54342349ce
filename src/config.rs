//! Run and layer configuration
//!
//! This module provides the JSON configuration structures for an inner product
//! layer run: the execution mode, the filler seed and the layer parameters
//! (output count, bias flag, fillers and an optional weight norm constraint).

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::context::ExecutionMode;
use crate::error::{Error, Result};
use crate::fillers::Filler;

/// Top-level configuration for a run.
///
/// # Example
///
/// ```json
/// {
///   "mode": "cpu",
///   "seed": 1701,
///   "layer": {
///     "name": "ip1",
///     "inner_product_param": {
///       "num_output": 10,
///       "weight_filler": { "type": "gaussian", "std": 0.01 },
///       "bias_filler": { "type": "constant", "value": 0.1 },
///       "weight_constraint": { "type": "max_norm", "max_norm": 3.0 }
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Execution backend: "cpu" (default) or "gpu", in any letter case
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Seed for the filler RNG
    #[serde(default)]
    pub seed: Option<u64>,

    pub layer: LayerConfig,
}

/// A named layer and its inner product parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    #[serde(default)]
    pub name: String,

    pub inner_product_param: InnerProductConfig,
}

impl LayerConfig {
    /// Shorthand for an unnamed layer.
    pub fn new(inner_product_param: InnerProductConfig) -> Self {
        Self {
            name: String::new(),
            inner_product_param,
        }
    }
}

/// Parameters of a fully-connected layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InnerProductConfig {
    /// Number of outputs (N)
    pub num_output: usize,

    /// Whether to learn an additive bias (default true)
    #[serde(default = "default_bias_term")]
    pub bias_term: bool,

    #[serde(default)]
    pub weight_filler: Filler,

    #[serde(default)]
    pub bias_filler: Filler,

    /// Column norm constraint applied by `apply_weight_constraint`
    #[serde(default)]
    pub weight_constraint: Option<NormConstraint>,
}

impl InnerProductConfig {
    /// `num_output` outputs with bias, zero fillers and no constraint.
    pub fn new(num_output: usize) -> Self {
        Self {
            num_output,
            bias_term: true,
            weight_filler: Filler::default(),
            bias_filler: Filler::default(),
            weight_constraint: None,
        }
    }
}

fn default_bias_term() -> bool {
    true
}

/// Norm constraint on weight columns.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum NormConstraint {
    /// Shrink columns whose norm exceeds `max_norm` back to `max_norm`.
    MaxNorm { max_norm: f32 },
    /// Rescale columns outside `[min_norm, max_norm]` to `target_norm`.
    NormBand {
        min_norm: f32,
        max_norm: f32,
        target_norm: f32,
    },
}

/// Loads a run configuration from a JSON file and validates it.
///
/// Unknown keys are rejected at every level, so a misspelled option fails
/// here instead of silently falling back to its default.
///
/// # Arguments
///
/// * `path` - Path to the JSON file
///
/// # Returns
///
/// The parsed configuration, or [`Error::Io`] / [`Error::Json`] /
/// [`Error::Config`] for unreadable, malformed or out-of-range input.
///
/// # Examples
///
/// ```no_run
/// use rust_inner_product::config::load_config;
///
/// let cfg = load_config("config/ip_cpu.json").unwrap();
/// assert!(cfg.layer.inner_product_param.num_output > 0);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parses and validates a run configuration from a JSON string.
pub fn parse_config(contents: &str) -> Result<RunConfig> {
    let config: RunConfig = serde_json::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks value ranges that deserialization alone cannot express.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    validate_inner_product(&config.layer.inner_product_param)
}

pub fn validate_inner_product(param: &InnerProductConfig) -> Result<()> {
    if param.num_output == 0 {
        return Err(Error::Config("num_output must be positive".to_string()));
    }

    param.weight_filler.validate()?;
    if param.bias_term {
        param.bias_filler.validate()?;
    }

    match param.weight_constraint {
        Some(NormConstraint::MaxNorm { max_norm }) => {
            if max_norm < 0.0 {
                return Err(Error::Config("max_norm must be non-negative".to_string()));
            }
        }
        Some(NormConstraint::NormBand {
            min_norm,
            max_norm,
            target_norm,
        }) => {
            if min_norm < 0.0 || max_norm < 0.0 || target_norm < 0.0 {
                return Err(Error::Config(
                    "norm band values must be non-negative".to_string(),
                ));
            }
            if min_norm > max_norm {
                return Err(Error::Config(format!(
                    "norm band min_norm {} exceeds max_norm {}",
                    min_norm, max_norm
                )));
            }
        }
        None => {}
    }

    Ok(())
}
