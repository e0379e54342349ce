//! Host backend: BLAS level 1-3 routines through `cblas`.

use cblas::{sgemm, sgemv, snrm2, sscal, Layout, Transpose as CblasTranspose};

use super::{check_gemm_operands, check_gemv_operands, check_strided, MathBackend, Transpose};
use crate::blob::SyncedMemory;
use crate::error::{Error, Result};

/// BLAS-backed math on host memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuMath;

impl CpuMath {
    pub fn new() -> Self {
        CpuMath
    }
}

fn cblas_transpose(trans: Transpose) -> CblasTranspose {
    match trans {
        Transpose::NoTrans => CblasTranspose::None,
        Transpose::Trans => CblasTranspose::Ordinary,
    }
}

/// Convert a dimension to the `i32` that CBLAS takes.
fn blas_int(what: &str, value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::Shape(format!("{} = {} does not fit a BLAS integer", what, value)))
}

// BLAS rejects degenerate leading dimensions, so empty products are handled here.
fn scale_in_place(values: &mut [f32], beta: f32) {
    if beta == 0.0 {
        values.iter_mut().for_each(|v| *v = 0.0);
    } else {
        values.iter_mut().for_each(|v| *v *= beta);
    }
}

impl MathBackend for CpuMath {
    fn name(&self) -> &'static str {
        "cpu"
    }

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
    ) -> Result<()> {
        check_gemm_operands(m, n, k, a, b, c)?;
        if m == 0 || n == 0 {
            return Ok(());
        }
        if k == 0 {
            scale_in_place(&mut c.mutable_cpu_data()?[..m * n], beta);
            return Ok(());
        }

        let lda = blas_int("lda", if trans_a.is_trans() { m } else { k })?;
        let ldb = blas_int("ldb", if trans_b.is_trans() { k } else { n })?;
        let (m, n, k) = (blas_int("m", m)?, blas_int("n", n)?, blas_int("k", k)?);
        let a = a.cpu_data()?;
        let b = b.cpu_data()?;
        let c = c.mutable_cpu_data()?;

        unsafe {
            sgemm(
                Layout::RowMajor,
                cblas_transpose(trans_a),
                cblas_transpose(trans_b),
                m,
                n,
                k,
                alpha,
                &a,
                lda,
                &b,
                ldb,
                beta,
                c,
                n,
            );
        }
        Ok(())
    }

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
    ) -> Result<()> {
        check_gemv_operands(trans_a, m, n, a, x, y)?;
        let y_len = if trans_a.is_trans() { n } else { m };
        if m == 0 || n == 0 {
            scale_in_place(&mut y.mutable_cpu_data()?[..y_len], beta);
            return Ok(());
        }

        let (m, n) = (blas_int("m", m)?, blas_int("n", n)?);
        let a = a.cpu_data()?;
        let x = x.cpu_data()?;
        let y = y.mutable_cpu_data()?;

        unsafe {
            sgemv(
                Layout::RowMajor,
                cblas_transpose(trans_a),
                m,
                n,
                alpha,
                &a,
                n,
                &x,
                1,
                beta,
                y,
                1,
            );
        }
        Ok(())
    }

    fn scal(
        &self,
        n: usize,
        alpha: f32,
        x: &mut SyncedMemory,
        offset: usize,
        inc: usize,
    ) -> Result<()> {
        check_strided("scal", n, x.len(), offset, inc)?;
        if n == 0 {
            return Ok(());
        }
        let (count, stride) = (blas_int("n", n)?, blas_int("inc", inc)?);
        let x = x.mutable_cpu_data()?;
        unsafe {
            sscal(count, alpha, &mut x[offset..], stride);
        }
        Ok(())
    }

    fn nrm2(&self, n: usize, x: &SyncedMemory, offset: usize, inc: usize) -> Result<f32> {
        check_strided("nrm2", n, x.len(), offset, inc)?;
        if n == 0 {
            return Ok(0.0);
        }
        let (count, stride) = (blas_int("n", n)?, blas_int("inc", inc)?);
        let x = x.cpu_data()?;
        Ok(unsafe { snrm2(count, &x[offset..], stride) })
    }
}
