//! Correction application (§4.H): recovers a DUT's true S-parameters from a raw measurement
//! using a solved [`crate::cal::CalibrationData`], interpolating error terms to the measurement
//! frequency when it falls between (or outside, within slack) calibrated points.

use crate::cal::CalibrationData;
use crate::error::VnaError;
use crate::layout::{leakage_index, CalType};
use crate::numeric::linalg;
use crate::numeric::rational::{interp, SegmentHint};
use crate::numeric::CMatrix;
use num_complex::Complex64;

/// Interpolates every stored error term to `frequency`, given a per-call `hint` the caller
/// reuses across a monotonic sweep for O(1) amortized lookups (mirrors the parameter store's use
/// of the same rational-interpolation primitive).
fn interpolate_terms(data: &CalibrationData, frequency: f64, hint: &mut SegmentHint) -> Vec<Complex64> {
    let n_terms = data.layout.error_terms_total;
    let mut out = vec![Complex64::new(0.0, 0.0); n_terms];
    for term_idx in 0..n_terms {
        let values: Vec<Complex64> = data.error_terms.iter().map(|row| row[term_idx]).collect();
        out[term_idx] = interp(&data.frequencies, &values, frequency, hint);
    }
    out
}

/// Applies the calibration to a raw measurement matrix `m` (`m_rows x m_columns`, row-major) at
/// `frequency`, returning the corrected `m_columns x m_columns` S-parameter matrix (or, for
/// UE14/E12, the per-column corrected values assembled into the same square shape).
pub fn apply(data: &CalibrationData, m: &[Complex64], frequency: f64, hint: &mut SegmentHint) -> Result<Vec<Complex64>, VnaError> {
    let expected = data.m_rows * data.m_columns;
    if m.len() != expected {
        return Err(VnaError::usage(format!(
            "apply: raw measurement has {} cells, expected {} ({}x{})",
            m.len(),
            expected,
            data.m_rows,
            data.m_columns
        )));
    }
    let terms = interpolate_terms(data, frequency, hint);
    let m = subtract_leakage(data, &terms, m);

    match data.cal_type.solved_as() {
        CalType::T8 | CalType::TE10 | CalType::T16 => apply_t_family(data, &terms, &m),
        CalType::U8 | CalType::UE10 | CalType::U16 => apply_u_family(data, &terms, &m),
        CalType::UE14 => apply_ue14(data, &terms, &m),
        CalType::E12 => unreachable!("E12 is solved as UE14"),
    }
}

/// Subtracts the interpolated leakage block `El` from every off-diagonal raw cell before the
/// closed-form solve (§4.H) — a no-op when this calibration type has no leakage block
/// (`el_terms == 0`, e.g. T8/U8).
fn subtract_leakage(data: &CalibrationData, terms: &[Complex64], m: &[Complex64]) -> Vec<Complex64> {
    let mut corrected = m.to_vec();
    if data.layout.el_terms == 0 {
        return corrected;
    }
    for row in 0..data.m_rows {
        for col in 0..data.m_columns {
            if let Some(idx) = leakage_index(data.m_rows, data.m_columns, row, col) {
                corrected[row * data.m_columns + col] -= terms[data.layout.el_offset + idx];
            }
        }
    }
    corrected
}

fn block(data: &CalibrationData, terms: &[Complex64], family: usize) -> CMatrix {
    let n = data.layout.block_dim;
    let blk = data.layout.blocks[family];
    let mut mat = CMatrix::zeros(n, n);
    if data.cal_type.is_dense() {
        for r in 0..n {
            for c in 0..n {
                mat[(r, c)] = terms[blk.offset + r * n + c];
            }
        }
    } else {
        for r in 0..n {
            mat[(r, r)] = terms[blk.offset + r];
        }
    }
    mat
}

fn raw_matrix(data: &CalibrationData, m: &[Complex64]) -> CMatrix {
    CMatrix::from_row_slice(data.m_rows, data.m_columns, m)
}

/// `S = (Ts − M·Tx)⁻¹·(M·Tm − Ti)`.
fn apply_t_family(data: &CalibrationData, terms: &[Complex64], m: &[Complex64]) -> Result<Vec<Complex64>, VnaError> {
    let ts = block(data, terms, 0);
    let ti = block(data, terms, 1);
    let tx = block(data, terms, 2);
    let tm = block(data, terms, 3);
    let mraw = raw_matrix(data, m);

    let lhs = &ts - &mraw * &tx;
    let rhs = &mraw * &tm - &ti;
    let s = linalg::mldivide(&lhs, &rhs)?;
    Ok(s.iter().copied().collect())
}

/// `S = (Um·M + Ui)·(Ux·M + Us)⁻¹`.
fn apply_u_family(data: &CalibrationData, terms: &[Complex64], m: &[Complex64]) -> Result<Vec<Complex64>, VnaError> {
    let um = block(data, terms, 0);
    let ui = block(data, terms, 1);
    let ux = block(data, terms, 2);
    let us = block(data, terms, 3);
    let mraw = raw_matrix(data, m);

    let lhs = &um * &mraw + &ui;
    let rhs = &ux * &mraw + &us;
    let s = linalg::mrdivide(&lhs, &rhs)?;
    Ok(s.iter().copied().collect())
}

/// UE14/E12: one independent scalar solve per DUT column `q`, against all `m_rows` raw
/// receivers. Column `q`'s equation is `s*(ux_q[r]*m[r][q] + us_q[r]) = um_q[r]*m[r][q] +
/// ui_q[r]` for every raw receiver `r`; the least-squares value across all receivers is used
/// when `m_rows > 1` (the common case of a redundant reference receiver).
fn apply_ue14(data: &CalibrationData, terms: &[Complex64], m: &[Complex64]) -> Result<Vec<Complex64>, VnaError> {
    let m_rows = data.m_rows;
    let m_columns = data.m_columns;
    let mut s = vec![Complex64::new(0.0, 0.0); m_columns * m_columns];

    for q in 0..m_columns {
        let base = data.layout.system_offset(q);
        let stride = data.layout.block_dim;
        // Average the per-receiver quotient across the (usually redundant) raw receivers.
        let mut acc = Complex64::new(0.0, 0.0);
        let mut used = 0usize;
        for r in 0..m_rows {
            let mval = m[r * m_columns + q];
            let um = terms[base + r];
            let ui = terms[base + stride + r];
            let (ux, us) = if data.layout.families == 4 {
                (terms[base + 2 * stride + r], terms[base + 3 * stride + r])
            } else {
                (Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0))
            };
            let denominator = ux * mval + us;
            if denominator.norm() < 1e-12 {
                continue;
            }
            acc += (um * mval + ui) / denominator;
            used += 1;
        }
        if used == 0 {
            return Err(VnaError::math("apply: every raw receiver denominator vanished for this column"));
        }
        s[q * m_columns + q] = acc / used as f64;
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cal::CalibrationData;
    use crate::layout::Layout;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn ideal_t8_data(freqs: Vec<f64>) -> CalibrationData {
        // Identity error box: Ts=1, Ti=0, Tx=0, Tm=1 (diagonal 2x2) => M == S exactly.
        let layout = Layout::new(CalType::T8, 2, 2).unwrap();
        let mut terms = vec![Complex64::new(0.0, 0.0); layout.error_terms_total];
        // families: Ts(0..2), Ti(2..4), Tx(4..6), Tm(6..8)
        terms[0] = c(1.0, 0.0);
        terms[1] = c(1.0, 0.0);
        terms[6] = c(1.0, 0.0);
        terms[7] = c(1.0, 0.0);
        let error_terms = freqs.iter().map(|_| terms.clone()).collect();
        CalibrationData {
            cal_type: CalType::T8,
            m_rows: 2,
            m_columns: 2,
            layout,
            frequencies: freqs,
            error_terms,
            pvalues: None,
        }
    }

    #[test]
    fn identity_error_box_recovers_raw_measurement() {
        let data = ideal_t8_data(vec![1e9, 2e9]);
        let mut hint = SegmentHint::default();
        let m = vec![c(0.3, 0.1), c(0.0, 0.0), c(0.0, 0.0), c(0.2, -0.1)];
        let s = apply(&data, &m, 1.5e9, &mut hint).unwrap();
        for (got, want) in s.iter().zip(m.iter()) {
            assert!((got - want).norm() < 1e-9);
        }
    }

    #[test]
    fn rejects_wrong_shaped_input() {
        let data = ideal_t8_data(vec![1e9]);
        let mut hint = SegmentHint::default();
        let err = apply(&data, &[c(0.0, 0.0)], 1e9, &mut hint).unwrap_err();
        assert!(format!("{}", err).len() > 0);
    }
}
