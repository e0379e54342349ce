//! Dense linear algebra provider.
//!
//! The layer issues every numerical step through [`MathBackend`]. Two
//! implementations exist: [`cpu::CpuMath`] (BLAS through `cblas`) and, with the
//! `wgpu` feature, [`gpu::GpuMath`] (WGSL compute kernels). All matrices are
//! row-major, matching the `cblas` calls in the CPU backend.

pub mod cpu;
#[cfg(feature = "wgpu")]
pub mod gpu;

use crate::blob::SyncedMemory;
use crate::error::{Error, Result};

/// Whether a GEMM/GEMV operand is used as stored or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    NoTrans,
    Trans,
}

impl Transpose {
    pub fn is_trans(self) -> bool {
        self == Transpose::Trans
    }
}

/// Matrix primitives consumed by layers, one implementation per execution backend.
///
/// Operands are [`SyncedMemory`] so each backend can pick the residency it needs.
#[allow(clippy::too_many_arguments)]
pub trait MathBackend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// `C = alpha * op(A) * op(B) + beta * C` with `op(A)` M×K, `op(B)` K×N, `C` M×N.
    ///
    /// With `beta == 0` the previous contents of `C` are ignored.
    ///
    /// # Arguments
    ///
    /// * `trans_a`, `trans_b` - whether `A` and `B` are read transposed
    /// * `m`, `n`, `k` - dimensions of the product
    /// * `a`, `b` - row-major inputs of exactly `m * k` and `k * n` values
    /// * `c` - row-major output of exactly `m * n` values
    ///
    /// # Errors
    ///
    /// [`Error::Shape`] when an operand length does not match its dimensions or
    /// a dimension does not fit the backend's index type.
    fn gemm(
        &self,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &SyncedMemory,
        b: &SyncedMemory,
        beta: f32,
        c: &mut SyncedMemory,
    ) -> Result<()>;

    /// `y = alpha * op(A) * x + beta * y` with `A` stored as M×N.
    ///
    /// # Arguments
    ///
    /// * `trans_a` - `Trans` computes `A^T * x`, so `x` has M values and `y` has N
    /// * `m`, `n` - stored shape of `A`
    fn gemv(
        &self,
        trans_a: Transpose,
        m: usize,
        n: usize,
        alpha: f32,
        a: &SyncedMemory,
        x: &SyncedMemory,
        beta: f32,
        y: &mut SyncedMemory,
    ) -> Result<()>;

    /// Scale `n` elements starting at `offset`, `inc` apart, by `alpha`.
    fn scal(&self, n: usize, alpha: f32, x: &mut SyncedMemory, offset: usize, inc: usize)
        -> Result<()>;

    /// Euclidean norm of `n` elements starting at `offset`, `inc` apart.
    ///
    /// # Returns
    ///
    /// The norm, computed without overflow for entries near `f32::MAX`.
    fn nrm2(&self, n: usize, x: &SyncedMemory, offset: usize, inc: usize) -> Result<f32>;
}

pub(crate) fn check_gemm_operands(
    m: usize,
    n: usize,
    k: usize,
    a: &SyncedMemory,
    b: &SyncedMemory,
    c: &SyncedMemory,
) -> Result<()> {
    check_len("gemm A", a.len(), product(m, k)?)?;
    check_len("gemm B", b.len(), product(k, n)?)?;
    check_len("gemm C", c.len(), product(m, n)?)
}

pub(crate) fn check_gemv_operands(
    trans_a: Transpose,
    m: usize,
    n: usize,
    a: &SyncedMemory,
    x: &SyncedMemory,
    y: &SyncedMemory,
) -> Result<()> {
    let (x_len, y_len) = if trans_a.is_trans() { (m, n) } else { (n, m) };
    check_len("gemv A", a.len(), product(m, n)?)?;
    check_len("gemv x", x.len(), x_len)?;
    check_len("gemv y", y.len(), y_len)
}

pub(crate) fn check_strided(
    what: &str,
    n: usize,
    len: usize,
    offset: usize,
    inc: usize,
) -> Result<()> {
    if inc == 0 {
        return Err(Error::Shape(format!("{} stride must be positive", what)));
    }
    if n > 0 && offset + (n - 1) * inc >= len {
        return Err(Error::Shape(format!(
            "{} reads {} elements from offset {} with stride {} past length {}",
            what, n, offset, inc, len
        )));
    }
    Ok(())
}

// Operands must match their dimensions exactly; a longer buffer means the
// caller and the backend disagree about the layout.
fn check_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(Error::Shape(format!(
            "{} holds {} values, expected {}",
            what, actual, expected
        )));
    }
    Ok(())
}

fn product(rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols)
        .ok_or_else(|| Error::Shape(format!("{} x {} operand overflows usize", rows, cols)))
}
