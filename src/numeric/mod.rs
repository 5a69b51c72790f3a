//! Numeric primitives: QR/LU solves, rational-function interpolation, cubic splines, and the
//! regularized incomplete gamma function used by the chi-squared p-value (§4.A).
//!
//! This module deliberately stays close to what `nalgebra::linalg` already offers; it exists so
//! the rest of the crate has a small, VNA-flavored surface (complex dense matrices, a
//! restartable interpolation hint) instead of reaching into `nalgebra` generics everywhere.

pub mod chi2;
pub mod linalg;
pub mod rational;
pub mod spline;

use num_complex::Complex64;

/// Dense complex matrix, row-major-agnostic (nalgebra is column-major internally); used for
/// every S/T/U/measurement block in the crate since their sizes are only known at run time.
pub type CMatrix = nalgebra::DMatrix<Complex64>;
/// Dense complex column vector.
pub type CVector = nalgebra::DVector<Complex64>;
