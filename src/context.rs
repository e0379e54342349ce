//! Execution context threaded through every layer call.
//!
//! The context picks the math backend and owns the RNG used by fillers. There is
//! no process-wide mode: two contexts with different backends can coexist.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::math::cpu::CpuMath;
#[cfg(feature = "wgpu")]
use crate::math::gpu::{GpuDevice, GpuMath};
use crate::math::MathBackend;
use crate::utils::SimpleRng;

/// Seed used when neither the caller nor the configuration supplies one.
pub const DEFAULT_SEED: u64 = 1701;

/// Which backend a context dispatches to.
///
/// Parsed case-insensitively, both from strings and from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ExecutionMode {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionMode::Cpu),
            "gpu" => Ok(ExecutionMode::Gpu),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for ExecutionMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Cpu => write!(f, "cpu"),
            ExecutionMode::Gpu => write!(f, "gpu"),
        }
    }
}

enum Backend {
    Cpu(CpuMath),
    #[cfg(feature = "wgpu")]
    Gpu(GpuMath),
}

/// Backend selection plus filler RNG.
pub struct ExecutionContext {
    backend: Backend,
    rng: RefCell<SimpleRng>,
}

impl ExecutionContext {
    /// Host context backed by BLAS.
    pub fn cpu() -> Self {
        Self {
            backend: Backend::Cpu(CpuMath::new()),
            rng: RefCell::new(SimpleRng::new(DEFAULT_SEED)),
        }
    }

    /// Accelerator context on the default adapter.
    ///
    /// Returns [`Error::Device`] when no adapter exists or the crate was built
    /// without the `wgpu` feature.
    #[cfg(feature = "wgpu")]
    pub fn gpu() -> Result<Self> {
        let device = GpuDevice::new()?;
        tracing::debug!(adapter = device.adapter_name(), "created accelerator context");
        Ok(Self {
            backend: Backend::Gpu(GpuMath::new(device)),
            rng: RefCell::new(SimpleRng::new(DEFAULT_SEED)),
        })
    }

    #[cfg(not(feature = "wgpu"))]
    pub fn gpu() -> Result<Self> {
        Err(Error::Device("built without the `wgpu` feature".to_string()))
    }

    pub fn new(mode: ExecutionMode) -> Result<Self> {
        match mode {
            ExecutionMode::Cpu => Ok(Self::cpu()),
            ExecutionMode::Gpu => Self::gpu(),
        }
    }

    /// Reseed the filler RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        *self.rng.get_mut() = SimpleRng::new(seed);
        self
    }

    /// Context for the configured mode and seed.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let ctx = Self::new(config.mode)?;
        Ok(ctx.with_seed(config.seed.unwrap_or(DEFAULT_SEED)))
    }

    pub fn mode(&self) -> ExecutionMode {
        match self.backend {
            Backend::Cpu(_) => ExecutionMode::Cpu,
            #[cfg(feature = "wgpu")]
            Backend::Gpu(_) => ExecutionMode::Gpu,
        }
    }

    /// The math provider every numerical step goes through.
    pub fn math(&self) -> &dyn MathBackend {
        match &self.backend {
            Backend::Cpu(math) => math as &dyn MathBackend,
            #[cfg(feature = "wgpu")]
            Backend::Gpu(math) => math as &dyn MathBackend,
        }
    }

    pub fn rng(&self) -> RefMut<'_, SimpleRng> {
        self.rng.borrow_mut()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("mode", &self.mode())
            .finish()
    }
}
