//! Variable-projection nonlinear autocalibration (§4.G), used whenever one or more standards
//! carry an `Unknown`/`Correlated` parameter (an unresolved reflect coefficient, or an
//! unknown-length line). Alternates a linear error-term solve (given the current standard-value
//! guesses) with a nonlinear refinement of the unknown standard values (given the current error
//! terms), in the spirit of variable projection — the same "hold one block fixed, solve the
//! other, iterate" structure the teacher's Kalman filter uses between time and measurement
//! updates, just applied to a batch least-squares problem instead of a sequential one.

use crate::cal::CalibrationData;
use crate::error::VnaError;
use crate::layout::Layout;
use crate::newcal::NewCalibrationBuilder;
use crate::numeric::chi2::chisq_to_pvalue;
use crate::numeric::linalg;
use crate::numeric::{CMatrix, CVector};
use crate::param::{ParamHandle, Parameter, ParameterStore};
use num_complex::Complex64;
use std::collections::HashMap;

/// Outer-loop strategy switch (§9 resolved Open Question: Levenberg-Marquardt is the default;
/// Gauss-Newton is kept available rather than deleted, for calibrations whose residual surface
/// is well-behaved enough not to need LM's damping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    GaussNewton,
    LevenbergMarquardt,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::LevenbergMarquardt
    }
}

/// Collects the handles of every `Unknown`/`Correlated` standard participating in `builder`,
/// each paired with its initial guess.
fn unknown_standard_handles(builder: &NewCalibrationBuilder, store: &ParameterStore) -> Result<Vec<ParamHandle>, VnaError> {
    let mut handles = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for m in &builder.measurements {
        if let Parameter::Unknown { .. } | Parameter::Correlated { .. } = store.get(m.standard)? {
            if seen.insert(m.standard) {
                handles.push(m.standard);
            }
        }
    }
    Ok(handles)
}

/// The penalty a `Correlated` standard contributes to the outer loop's residual for straying from
/// the handle it's constrained to (§4.G): `|w*(p_i - p_other)|^2` with `w = 1/sigma(f)`. `Unknown`
/// standards (and any handle not in `guesses`) contribute nothing.
fn correlated_penalty(
    store: &ParameterStore,
    freq: f64,
    unknowns: &[ParamHandle],
    guesses: &HashMap<ParamHandle, Complex64>,
) -> Result<f64, VnaError> {
    let mut penalty = 0.0;
    for &h in unknowns {
        if let Parameter::Correlated { other, .. } = store.get(h)? {
            let sigma = store.correlated_sigma(h, freq)?;
            if sigma <= 0.0 {
                continue;
            }
            let w = 1.0 / sigma;
            let p_i = *guesses.get(&h).unwrap();
            let p_other = store.get_value(*other, freq, guesses)?;
            penalty += (w * (p_i - p_other)).norm_sqr();
        }
    }
    Ok(penalty)
}

/// Solves the linear error-term system at `guesses` and adds the [`correlated_penalty`] on top of
/// its residual, giving the combined objective the outer loop actually descends.
fn solve_with_penalty(
    builder: &NewCalibrationBuilder,
    store: &ParameterStore,
    layout: &Layout,
    fi: usize,
    freq: f64,
    guesses: &HashMap<ParamHandle, Complex64>,
    unknowns: &[ParamHandle],
) -> Result<(Vec<Complex64>, f64, usize), VnaError> {
    let (terms, residual, count) = linear_solve_given_guesses(builder, store, layout, fi, guesses)?;
    let penalty = correlated_penalty(store, freq, unknowns, guesses)?;
    Ok((terms, residual + penalty, count))
}

/// Solves `builder`'s calibration with [`Strategy::LevenbergMarquardt`] as the default strategy.
pub fn solve(builder: &NewCalibrationBuilder, store: &mut ParameterStore) -> Result<CalibrationData, VnaError> {
    solve_with(builder, store, Strategy::default())
}

/// Solves `builder`'s calibration using the requested outer-loop strategy.
pub fn solve_with(
    builder: &NewCalibrationBuilder,
    store: &mut ParameterStore,
    strategy: Strategy,
) -> Result<CalibrationData, VnaError> {
    let layout = builder.layout.clone();
    let unknowns = unknown_standard_handles(builder, store)?;
    let mut guesses: HashMap<ParamHandle, Complex64> = HashMap::new();
    for &h in &unknowns {
        let initial = match store.get(h)? {
            Parameter::Unknown { initial_guess } | Parameter::Correlated { initial_guess, .. } => {
                initial_guess.unwrap_or(Complex64::new(0.5, 0.0))
            }
            _ => unreachable!(),
        };
        guesses.insert(h, initial);
    }

    let mut error_terms = Vec::with_capacity(builder.frequencies.len());
    let mut pvalues = Vec::with_capacity(builder.frequencies.len());

    for fi in 0..builder.frequencies.len() {
        let freq = builder.frequencies[fi];
        let mut lambda = 1e-3; // Levenberg-Marquardt damping factor, reset per frequency
        let mut current_guesses = guesses.clone();

        let (mut terms, mut last_residual_norm, mut equation_count) =
            solve_with_penalty(builder, store, &layout, fi, freq, &current_guesses, &unknowns)?;

        for _iteration in 0..builder.config.iteration_limit {
            if unknowns.is_empty() {
                break; // purely linear: one solve is exact, nothing to refine
            }
            let step = numerical_gradient_step(builder, store, &layout, fi, freq, &current_guesses, &unknowns)?;

            let scale = match strategy {
                Strategy::GaussNewton => 1.0,
                Strategy::LevenbergMarquardt => 1.0 / (1.0 + lambda),
            };
            let trial_guesses = apply_step(&current_guesses, &unknowns, &step, strategy, lambda);
            let (trial_terms, trial_residual, trial_count) =
                solve_with_penalty(builder, store, &layout, fi, freq, &trial_guesses, &unknowns)?;

            // §4.G's dual termination: the RMS of the (damped) step actually applied to the
            // unknown standard values, gated by `p_tolerance`, AND the RMS change in the solved
            // error-term vector, gated by `et_tolerance` — both must be satisfied to stop.
            let p_length = (unknowns.len().max(1)) as f64;
            let d_sumsq: f64 = unknowns.iter().map(|h| (*step.get(h).unwrap() * scale).norm_sqr()).sum();
            let p_rms = (d_sumsq / p_length).sqrt();

            let x_length = (trial_terms.len().max(1)) as f64;
            let x_sumsq: f64 = trial_terms.iter().zip(terms.iter()).map(|(a, b)| (a - b).norm_sqr()).sum();
            let x_rms = (x_sumsq / x_length).sqrt();
            let converged = p_rms <= builder.config.p_tolerance && x_rms <= builder.config.et_tolerance;

            let improved = trial_residual <= last_residual_norm;
            match strategy {
                Strategy::GaussNewton => {
                    current_guesses = trial_guesses;
                    terms = trial_terms;
                    equation_count = trial_count;
                    last_residual_norm = trial_residual;
                    if converged {
                        break;
                    }
                }
                Strategy::LevenbergMarquardt => {
                    if improved {
                        lambda = (lambda * 0.5).max(1e-12);
                        current_guesses = trial_guesses;
                        terms = trial_terms;
                        equation_count = trial_count;
                        last_residual_norm = trial_residual;
                        if converged {
                            break;
                        }
                    } else {
                        lambda *= 2.0;
                        if lambda > 1e8 {
                            break;
                        }
                    }
                }
            }
        }

        let dof = equation_count.saturating_sub(layout.unknown_count()).max(1);
        let chisq = last_residual_norm + builder.leakage_chisq_contribution(fi);
        let pvalue = chisq_to_pvalue(chisq, dof as f64);
        if pvalue < builder.config.pvalue_limit {
            return Err(VnaError::math(format!(
                "calibration fit at {} Hz failed the p-value gate ({} < {})",
                freq, pvalue, builder.config.pvalue_limit
            )));
        }
        pvalues.push(pvalue);
        error_terms.push(terms);

        for &h in &unknowns {
            if let Some(&v) = current_guesses.get(&h) {
                guesses.insert(h, v); // seed the next frequency's initial guess
            }
        }
    }

    Ok(CalibrationData {
        cal_type: builder.cal_type,
        m_rows: builder.m_rows,
        m_columns: builder.m_columns,
        layout,
        frequencies: builder.frequencies.clone(),
        error_terms,
        pvalues: Some(pvalues),
    })
}

/// Solves the linear error-term system at frequency `fi` given fixed standard-value `guesses`,
/// returning the filled term vector, the sum-of-squares residual norm, and the equation count
/// (used for the p-value's degrees of freedom).
fn linear_solve_given_guesses(
    builder: &NewCalibrationBuilder,
    store: &ParameterStore,
    layout: &Layout,
    fi: usize,
    guesses: &HashMap<ParamHandle, Complex64>,
) -> Result<(Vec<Complex64>, f64, usize), VnaError> {
    let equations = builder.build_equations(fi, store, guesses)?;
    if equations.is_empty() {
        return Err(VnaError::usage("calibration has no equations at this frequency"));
    }

    let index_map = dense_index_map(layout);
    let mut a = CMatrix::zeros(equations.len(), index_map.len());
    let mut b = CVector::zeros(equations.len());
    for (row, eq) in equations.iter().enumerate() {
        let mut rhs = Complex64::new(0.0, 0.0);
        for term in &eq.terms {
            let coeff = term.coefficient() * eq.weight;
            match term.x_index {
                Some(idx) => {
                    let col = *index_map.get(&idx).expect("unity index excluded from map");
                    a[(row, col)] += coeff;
                }
                None => rhs -= coeff,
            }
        }
        b[row] = rhs;
    }

    let x = if a.nrows() == a.ncols() {
        linalg::lu_solve(&a, &b)?
    } else {
        // Over-determined: least squares via the normal equations (A^H A x = A^H b), reusing
        // the same LU solver since A^H A is square and Hermitian positive (semi-)definite for a
        // well-posed calibration.
        let at = a.adjoint();
        let ata = &at * &a;
        let atb = &at * &b;
        linalg::lu_solve(&ata, &atb)?
    };

    let residual = &a * &x - &b;
    let residual_norm: f64 = residual.iter().map(|c| c.norm_sqr()).sum();

    let mut full = vec![Complex64::new(0.0, 0.0); layout.error_terms_total];
    for (idx, &col) in &index_map {
        full[*idx] = x[col];
    }
    if let Some(unity_idx) = layout.unity_index {
        full[unity_idx] = Complex64::new(1.0, 0.0);
    } else if layout.cal_type == crate::layout::CalType::UE14 {
        for s in 0..layout.systems {
            if let Some(u) = layout.unity_index_for_system(s) {
                full[layout.system_offset(s) + u] = Complex64::new(1.0, 0.0);
            }
        }
    }
    let leakage = builder.estimate_leakage(fi);
    full[layout.el_offset..layout.el_offset + layout.el_terms].copy_from_slice(&leakage);

    Ok((full, residual_norm, equations.len()))
}

/// A finite-difference gradient of the residual norm with respect to each unknown standard's
/// real and imaginary parts, used as a simple steepest-descent/Gauss-Newton-style step direction.
/// A full Jacobian-based Gauss-Newton step is unnecessary here: the outer loop only needs a
/// descent direction, since the inner linear solve already re-optimizes the error terms exactly
/// for any trial standard value.
fn numerical_gradient_step(
    builder: &NewCalibrationBuilder,
    store: &ParameterStore,
    layout: &Layout,
    fi: usize,
    freq: f64,
    guesses: &HashMap<ParamHandle, Complex64>,
    unknowns: &[ParamHandle],
) -> Result<HashMap<ParamHandle, Complex64>, VnaError> {
    const H: f64 = 1e-6;
    let (_, base_residual, _) = solve_with_penalty(builder, store, layout, fi, freq, guesses, unknowns)?;
    let mut step = HashMap::new();
    for &handle in unknowns {
        let base = *guesses.get(&handle).unwrap();
        let mut perturbed = guesses.clone();

        perturbed.insert(handle, base + Complex64::new(H, 0.0));
        let (_, r_re, _) = solve_with_penalty(builder, store, layout, fi, freq, &perturbed, unknowns)?;
        let d_re = (r_re - base_residual) / H;

        perturbed.insert(handle, base + Complex64::new(0.0, H));
        let (_, r_im, _) = solve_with_penalty(builder, store, layout, fi, freq, &perturbed, unknowns)?;
        let d_im = (r_im - base_residual) / H;

        step.insert(handle, Complex64::new(-d_re, -d_im));
    }
    Ok(step)
}

/// Applies a damped descent step: Gauss-Newton takes the full step; Levenberg-Marquardt scales
/// it by `1 / (1 + lambda)`, shrinking toward the current point as `lambda` grows.
fn apply_step(
    guesses: &HashMap<ParamHandle, Complex64>,
    unknowns: &[ParamHandle],
    step: &HashMap<ParamHandle, Complex64>,
    strategy: Strategy,
    lambda: f64,
) -> HashMap<ParamHandle, Complex64> {
    let scale = match strategy {
        Strategy::GaussNewton => 1.0,
        Strategy::LevenbergMarquardt => 1.0 / (1.0 + lambda),
    };
    let mut next = guesses.clone();
    for &h in unknowns {
        let g = *guesses.get(&h).unwrap();
        let s = *step.get(&h).unwrap();
        next.insert(h, g + s * scale);
    }
    next
}

fn dense_index_map(layout: &Layout) -> HashMap<usize, usize> {
    let mut map = HashMap::new();
    let mut col = 0;
    for system in 0..layout.systems {
        let base = layout.system_offset(system);
        let unity = layout.unity_index_for_system(system);
        for offset in 0..layout.system_stride {
            let idx = base + offset;
            if unity == Some(offset) {
                continue;
            }
            map.insert(idx, col);
            col += 1;
        }
    }
    map
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
    fn solves_with_an_unknown_reflect_standard() {
        let freqs = vec![1e9];
        let mut builder = NewCalibrationBuilder::new(CalType::E12, 1, 1, freqs).unwrap();
        builder.set_pvalue_limit(0.0); // synthetic data has no real noise; disable the gate
        let mut store = ParameterStore::new();
        let unknown_short = store.make_unknown(Some(c(-0.9, 0.0)));

        builder.add_single_reflect(0, ParamHandle::OPEN, &[c(1.0, 0.0)]).unwrap();
        builder.add_single_reflect(0, ParamHandle::MATCH, &[c(0.0, 0.0)]).unwrap();
        builder.add_single_reflect(0, unknown_short, &[c(-1.0, 0.0)]).unwrap();

        let data = solve(&builder, &mut store).unwrap();
        assert_eq!(data.frequencies.len(), 1);
        assert!(data.pvalues.is_some());
    }
}
