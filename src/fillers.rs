//! Parameter initializers.
//!
//! A [`Filler`] is plain configuration; [`fill`] writes its values into a blob's
//! data using the caller's RNG, so initialization is reproducible for a given seed.

use serde::Deserialize;

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::utils::SimpleRng;

/// Initialization strategy for a parameter blob.
///
/// Deserialized from JSON objects tagged by `type`, e.g.
/// `{ "type": "uniform", "min": -0.1, "max": 0.1 }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Filler {
    /// Every element set to `value`.
    Constant {
        #[serde(default)]
        value: f32,
    },
    /// Uniform samples in `[min, max)`.
    Uniform {
        #[serde(default)]
        min: f32,
        #[serde(default = "one")]
        max: f32,
    },
    /// Normal samples. With `sparse`, each element survives with probability
    /// `sparse / height` and is zeroed otherwise.
    Gaussian {
        #[serde(default)]
        mean: f32,
        #[serde(default = "one")]
        std: f32,
        #[serde(default)]
        sparse: Option<usize>,
    },
    /// Uniform `[0, 1)` samples, then every `num` slice rescaled to sum to one.
    PositiveUnitball,
    /// Uniform in `±sqrt(3 / fan_in)` with `fan_in = count / num`.
    Xavier,
}

fn one() -> f32 {
    1.0
}

impl Default for Filler {
    fn default() -> Self {
        Filler::Constant { value: 0.0 }
    }
}

impl Filler {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Filler::Constant { .. } => "constant",
            Filler::Uniform { .. } => "uniform",
            Filler::Gaussian { .. } => "gaussian",
            Filler::PositiveUnitball => "positive_unitball",
            Filler::Xavier => "xavier",
        }
    }

    /// Reject parameter combinations no blob could be filled with.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Filler::Uniform { min, max } if min > max => Err(Error::Config(format!(
                "uniform filler min {} exceeds max {}",
                min, max
            ))),
            Filler::Gaussian { std, .. } if std <= 0.0 => Err(Error::Config(format!(
                "gaussian filler std must be positive, got {}",
                std
            ))),
            _ => Ok(()),
        }
    }
}

/// Fill `blob`'s data according to `filler`.
pub fn fill(blob: &mut Blob, filler: &Filler, rng: &mut SimpleRng) -> Result<()> {
    filler.validate()?;
    let count = blob.count();
    if count == 0 {
        return Ok(());
    }
    let num = blob.num();
    let height = blob.height();
    let (num_ok, channels_ok) = (num == 1, blob.channels() == 1);

    match *filler {
        Filler::Constant { value } => {
            blob.mutable_cpu_data()?.iter_mut().for_each(|x| *x = value);
        }
        Filler::Uniform { min, max } => {
            for x in blob.mutable_cpu_data()? {
                *x = rng.gen_range_f32(min, max);
            }
        }
        Filler::Gaussian { mean, std, sparse } => {
            if sparse.is_some() && !(num_ok && channels_ok) {
                return Err(Error::Shape(format!(
                    "sparse gaussian filler needs num == channels == 1, got shape {:?}",
                    blob.shape()
                )));
            }
            let keep = sparse.map(|s| s as f32 / height as f32);
            for x in blob.mutable_cpu_data()? {
                *x = rng.gen_gaussian(mean, std);
                if let Some(p) = keep {
                    if !rng.gen_bernoulli(p) {
                        *x = 0.0;
                    }
                }
            }
        }
        Filler::PositiveUnitball => {
            let dim = count / num;
            let data = blob.mutable_cpu_data()?;
            for x in data.iter_mut() {
                *x = rng.next_f32();
            }
            for row in data.chunks_mut(dim) {
                let sum: f32 = row.iter().sum();
                if sum > 0.0 {
                    row.iter_mut().for_each(|x| *x /= sum);
                }
            }
        }
        Filler::Xavier => {
            let fan_in = count / num;
            let scale = (3.0 / fan_in as f32).sqrt();
            for x in blob.mutable_cpu_data()? {
                *x = rng.gen_range_f32(-scale, scale);
            }
        }
    }

    tracing::debug!(filler = filler.name(), count, "filled blob");
    Ok(())
}
