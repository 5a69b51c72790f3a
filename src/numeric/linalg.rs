//! Thin wrappers over `nalgebra::linalg::{QR, LU}` for complex dense systems, plus `minverse`
//! and `mrdivide`/`mldivide` equivalents (§4.A).

use super::{CMatrix, CVector};
use crate::error::VnaError;

/// Solves `a * x = b` for square `a` via LU decomposition. Returns `Math` if `a` is singular.
pub fn lu_solve(a: &CMatrix, b: &CVector) -> Result<CVector, VnaError> {
    assert_eq!(a.nrows(), a.ncols(), "lu_solve requires a square matrix");
    let lu = a.clone().lu();
    lu.solve(b)
        .ok_or_else(|| VnaError::math("singular matrix in linear solve"))
}

/// Solves the over- (or exactly-) determined least-squares problem `a * x ≈ b` via QR
/// decomposition. `a` must have at least as many rows as columns.
pub fn qr_solve(a: &CMatrix, b: &CVector) -> Result<CVector, VnaError> {
    if a.nrows() < a.ncols() {
        return Err(VnaError::usage(
            "qr_solve requires rows >= columns (under-determined system)",
        ));
    }
    let qr = a.clone().qr();
    qr.solve(b)
        .ok_or_else(|| VnaError::math("rank-deficient system in QR solve"))
}

/// Dispatches to `lu_solve` for square systems and `qr_solve` otherwise, matching the "Simple"
/// algorithm's rule in §4.G.
pub fn solve(a: &CMatrix, b: &CVector) -> Result<CVector, VnaError> {
    if a.nrows() == a.ncols() {
        lu_solve(a, b)
    } else {
        qr_solve(a, b)
    }
}

/// Matrix inverse (`minverse`). Returns `Math` if singular.
pub fn inverse(a: &CMatrix) -> Result<CMatrix, VnaError> {
    assert_eq!(a.nrows(), a.ncols(), "inverse requires a square matrix");
    a.clone()
        .try_inverse()
        .ok_or_else(|| VnaError::math("singular matrix in inverse"))
}

/// `mldivide`: `a \ b = a^-1 * b`, implemented via LU/QR as appropriate.
pub fn mldivide(a: &CMatrix, b: &CMatrix) -> Result<CMatrix, VnaError> {
    let mut cols = Vec::with_capacity(b.ncols());
    for c in 0..b.ncols() {
        cols.push(solve(a, &b.column(c).into_owned())?);
    }
    Ok(CMatrix::from_columns(&cols))
}

/// `mrdivide`: `b / a = b * a^-1`, computed as `(a^T \ b^T)^T`.
pub fn mrdivide(b: &CMatrix, a: &CMatrix) -> Result<CMatrix, VnaError> {
    let at = a.transpose();
    let bt = b.transpose();
    let xt = mldivide(&at, &bt)?;
    Ok(xt.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn lu_solve_identity() {
        let a = CMatrix::from_row_slice(2, 2, &[c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(1.0, 0.0)]);
        let b = CVector::from_vec(vec![c(3.0, -1.0), c(2.0, 4.0)]);
        let x = lu_solve(&a, &b).unwrap();
        assert_eq!(x[0], c(3.0, -1.0));
        assert_eq!(x[1], c(2.0, 4.0));
    }

    #[test]
    fn qr_solve_overdetermined() {
        // Over-determined consistent system: x = 2+0i exactly satisfies both rows.
        let a = CMatrix::from_row_slice(2, 1, &[c(1.0, 0.0), c(1.0, 0.0)]);
        let b = CVector::from_vec(vec![c(2.0, 0.0), c(2.0, 0.0)]);
        let x = qr_solve(&a, &b).unwrap();
        assert!((x[0] - c(2.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn inverse_roundtrip() {
        let a = CMatrix::from_row_slice(2, 2, &[c(1.0, 0.0), c(2.0, 0.0), c(0.0, 0.0), c(1.0, 0.0)]);
        let ai = inverse(&a).unwrap();
        let prod = &a * &ai;
        assert!((prod[(0, 0)] - c(1.0, 0.0)).norm() < 1e-9);
        assert!((prod[(1, 1)] - c(1.0, 0.0)).norm() < 1e-9);
        assert!(prod[(0, 1)].norm() < 1e-9);
    }
}
