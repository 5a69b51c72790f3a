//! TRL (Thru-Reflect-Line) closed-form fast path (§4.G), used when a two-port calibration's
//! standard set is a matched thru plus a line of unknown (or uncertain) length. This crate's
//! T8/TE10 error-term model is diagonal per raw-matrix port (§4.C), so its per-port linear system
//! only ever reads a standard's *reflection* cells — it has zero sensitivity to a line's
//! transmission value and can never determine an unknown line length on its own, no matter how
//! [`super::auto`] is iterated. TRL's closed form exists precisely to fill that gap: it recovers
//! the line's propagation factor from the eigenvalues of the cascaded thru/line measurement pair,
//! then hands the now-fully-determined standard set to [`super::auto`] for the rest (any
//! remaining `Unknown`/`Correlated` reflect standard is resolved there exactly as it would be for
//! any other calibration).
//!
//! # Derivation
//!
//! Write each raw two-port measurement's cascade (T-)parameters as `T11 = -(det S)/S21`,
//! `T12 = S11/S21`, `T21 = -S22/S21`, `T22 = 1/S21` — the same representation this crate's T-family
//! uses, since a one-port error adapter's `Ts/Ti/Tx/Tm` are exactly proportional to its own cascade
//! matrix's entries. For a matched reciprocal thru (`S11=S22=0`, `S12=S21=1`) cascaded between two
//! per-port error adapters `T0`, `T1`, the measured thru's cascade matrix is `T0 * inv(T1)`
//! (traversing `T1` backwards contributes its matrix inverse, since cascading a network forward
//! then immediately backward must reproduce the identity). For an ideal line of propagation factor
//! `g`, whose own cascade matrix is `diag(g, 1/g)`, the measured line's cascade is
//! `T0 * diag(g, 1/g) * inv(T1)`. Their ratio
//!
//! `M := T_line * inv(T_thru) = T0 * diag(g, 1/g) * inv(T0)`
//!
//! is similar to `diag(g, 1/g)`, so `g` and `1/g` are exactly the roots of `M`'s characteristic
//! quadratic `λ^2 - tr(M) λ + det(M) = 0` — no eigenvectors needed, just the two cascade matrices
//! built directly from the raw thru/line measurements.

use crate::error::VnaError;
use crate::layout::CalType;
use crate::newcal::NewCalibrationBuilder;
use crate::param::{Parameter, ParameterStore};
use num_complex::Complex64;
use crate::cal::CalibrationData;

/// A calibration is TRL-shaped when it is a two-port diagonal (T8/TE10) calibration with both a
/// thru and a line recorded between the same port pair (§4.C's dense T16 has no per-port-diagonal
/// identifiability gap to fill, so it is left to [`super::auto`]/[`super::simple`] directly).
pub fn is_trl_shaped(builder: &NewCalibrationBuilder) -> bool {
    let diagonal_two_port =
        matches!(builder.cal_type, CalType::T8 | CalType::TE10) && builder.m_rows == 2 && builder.m_columns == 2;
    if !diagonal_two_port {
        return false;
    }
    match (&builder.thru_raw, &builder.line_raw) {
        (Some(thru), Some(line)) => {
            (thru.port_a, thru.port_b) == (line.port_a, line.port_b)
                || (thru.port_a, thru.port_b) == (line.port_b, line.port_a)
        }
        _ => false,
    }
}

type Mat2 = [[Complex64; 2]; 2];

fn cascade_from_s(s11: Complex64, s12: Complex64, s21: Complex64, s22: Complex64) -> Result<Mat2, VnaError> {
    if s21.norm() == 0.0 {
        return Err(VnaError::math("TRL: thru/line standard has zero transmission; cannot form its cascade matrix"));
    }
    let det_s = s11 * s22 - s12 * s21;
    Ok([
        [-det_s / s21, s11 / s21],
        [-s22 / s21, Complex64::new(1.0, 0.0) / s21],
    ])
}

fn mat_mul(a: &Mat2, b: &Mat2) -> Mat2 {
    [
        [a[0][0] * b[0][0] + a[0][1] * b[1][0], a[0][0] * b[0][1] + a[0][1] * b[1][1]],
        [a[1][0] * b[0][0] + a[1][1] * b[1][0], a[1][0] * b[0][1] + a[1][1] * b[1][1]],
    ]
}

fn mat_inv(a: &Mat2) -> Result<Mat2, VnaError> {
    let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    if det.norm() == 0.0 {
        return Err(VnaError::math("TRL: thru measurement's cascade matrix is singular"));
    }
    Ok([
        [a[1][1] / det, -a[0][1] / det],
        [-a[1][0] / det, a[0][0] / det],
    ])
}

/// Solves `λ^2 - tr λ + det = 0`, returning both roots (either order).
fn quadratic_roots(trace: Complex64, det: Complex64) -> (Complex64, Complex64) {
    let disc = (trace * trace - Complex64::new(4.0, 0.0) * det).sqrt();
    ((trace + disc) / 2.0, (trace - disc) / 2.0)
}

/// Picks the physically meaningful root: closest to `hint` if the line standard carries an
/// initial guess, else the one with the more negative phase (the causal `e^{-jβl}` convention).
fn choose_root(lambda1: Complex64, lambda2: Complex64, hint: Option<Complex64>) -> Complex64 {
    match hint {
        Some(h) => {
            if (lambda1 - h).norm() <= (lambda2 - h).norm() {
                lambda1
            } else {
                lambda2
            }
        }
        None => {
            if lambda1.im <= lambda2.im {
                lambda1
            } else {
                lambda2
            }
        }
    }
}

/// Resolves the line standard's unknown propagation factor at every calibration frequency, if it
/// is still `Unknown`/`Correlated`; a no-op when the caller already supplied a concrete value.
fn resolve_line_standard(builder: &NewCalibrationBuilder, store: &mut ParameterStore) -> Result<(), VnaError> {
    let thru = builder.thru_raw.as_ref().expect("is_trl_shaped checked this");
    let line = builder.line_raw.as_ref().expect("is_trl_shaped checked this");

    let hint = match store.get(line.transmission)? {
        Parameter::Unknown { initial_guess } | Parameter::Correlated { initial_guess, .. } => *initial_guess,
        _ => return Ok(()), // already a concrete standard: nothing for the closed form to resolve
    };

    let mut g_values = Vec::with_capacity(builder.frequencies.len());
    for fi in 0..builder.frequencies.len() {
        let t_thru = cascade_from_s(thru.aa[fi], thru.ab[fi], thru.ba[fi], thru.bb[fi])?;
        let t_line = cascade_from_s(line.aa[fi], line.ab[fi], line.ba[fi], line.bb[fi])?;
        let m = mat_mul(&t_line, &mat_inv(&t_thru)?);

        let trace = m[0][0] + m[1][1];
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        let (lambda1, lambda2) = quadratic_roots(trace, det);
        g_values.push(choose_root(lambda1, lambda2, hint));
    }

    store.resolve_to_vector(line.transmission, builder.frequencies.clone(), g_values)
}

/// Solves the TRL-shaped calibration: resolves the line's propagation factor in closed form, then
/// delegates to [`super::auto`] for the error terms (and any remaining unknown reflect standard).
pub fn solve(builder: &NewCalibrationBuilder, store: &mut ParameterStore) -> Result<CalibrationData, VnaError> {
    resolve_line_standard(builder, store)?;
    super::auto::solve(builder, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CalType;
    use crate::param::ParamHandle;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn recognizes_trl_shaped_te10_builder() {
        let mut builder = NewCalibrationBuilder::new(CalType::TE10, 2, 2, vec![1e9]).unwrap();
        builder
            .add_double_reflect(0, ParamHandle::SHORT, &[c(-1.0, 0.0)], 1, ParamHandle::SHORT, &[c(-1.0, 0.0)])
            .unwrap();
        builder
            .add_through(0, 1, ParamHandle::MATCH, ParamHandle::OPEN, &[c(0.0, 0.0)], &[c(0.9, 0.0)], &[c(0.9, 0.0)], &[c(0.0, 0.0)])
            .unwrap();
        builder
            .add_line(0, 1, ParamHandle::MATCH, ParamHandle::OPEN, &[c(0.0, 0.0)], &[c(0.8, -0.2)], &[c(0.8, -0.2)], &[c(0.0, 0.0)])
            .unwrap();
        assert!(is_trl_shaped(&builder));
    }

    #[test]
    fn single_standard_is_not_trl_shaped() {
        let mut builder = NewCalibrationBuilder::new(CalType::TE10, 2, 2, vec![1e9]).unwrap();
        builder.add_single_reflect(0, ParamHandle::SHORT, &[c(-1.0, 0.0)]).unwrap();
        assert!(!is_trl_shaped(&builder));
    }

    #[test]
    fn recovers_unknown_line_propagation_from_ideal_cascade() {
        // Ideal adapters (T0 = T1 = identity): the raw thru/line measurements are exactly the
        // standards' own S-parameters, so the extracted `g` should equal the line's true value.
        let freqs = vec![1e9, 2e9];
        let mut builder = NewCalibrationBuilder::new(CalType::TE10, 2, 2, freqs.clone()).unwrap();
        let mut store = ParameterStore::new();
        let g_true = [c(0.8, -0.3), c(0.6, -0.6)];
        let unknown_line = store.make_unknown(Some(c(0.7, -0.3)));

        builder
            .add_double_reflect(0, ParamHandle::SHORT, &[c(-1.0, 0.0); 2], 1, ParamHandle::SHORT, &[c(-1.0, 0.0); 2])
            .unwrap();
        builder
            .add_through(
                0,
                1,
                ParamHandle::MATCH,
                ParamHandle::OPEN,
                &[c(0.0, 0.0); 2],
                &[c(1.0, 0.0); 2],
                &[c(1.0, 0.0); 2],
                &[c(0.0, 0.0); 2],
            )
            .unwrap();
        builder
            .add_line(
                0,
                1,
                ParamHandle::MATCH,
                unknown_line,
                &[c(0.0, 0.0); 2],
                &g_true,
                &g_true,
                &[c(0.0, 0.0); 2],
            )
            .unwrap();

        assert!(is_trl_shaped(&builder));
        resolve_line_standard(&builder, &mut store).unwrap();
        let solved = std::collections::HashMap::new();
        for (fi, &freq) in freqs.iter().enumerate() {
            let resolved = store.get_value(unknown_line, freq, &solved).unwrap();
            assert!((resolved - g_true[fi]).norm() < 1e-9);
        }
    }
}
