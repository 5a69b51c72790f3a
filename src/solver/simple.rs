//! Direct LU/QR error-term solve (§4.G "Simple"), used whenever every standard's parameter is
//! fully known (no `Unknown`/`Correlated` standard participates).

use crate::cal::CalibrationData;
use crate::error::VnaError;
use crate::newcal::NewCalibrationBuilder;
use crate::numeric::linalg;
use crate::numeric::{CMatrix, CVector};
use crate::param::ParameterStore;
use num_complex::Complex64;
use std::collections::HashMap;

/// Solves every frequency independently via LU (square) or QR (over-determined) on the system's
/// unknown vector, substituting the fixed unity value in directly.
pub fn solve(builder: &NewCalibrationBuilder, store: &ParameterStore) -> Result<CalibrationData, VnaError> {
    let layout = builder.layout.clone();
    let unknown_count = layout.unknown_count();
    if unknown_count == 0 {
        return Err(VnaError::usage("calibration has no unknown error terms to solve for"));
    }
    log::debug!(
        "simple solve: {} unknowns, {} frequencies, {} standards",
        unknown_count,
        builder.frequencies.len(),
        builder.measurements.len()
    );

    #[cfg(feature = "parallel")]
    let error_terms: Result<Vec<_>, VnaError> = {
        use rayon::prelude::*;
        (0..builder.frequencies.len())
            .into_par_iter()
            .map(|fi| solve_one_frequency(builder, store, &layout, fi))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let error_terms: Result<Vec<_>, VnaError> = (0..builder.frequencies.len())
        .map(|fi| solve_one_frequency(builder, store, &layout, fi))
        .collect();

    Ok(CalibrationData {
        cal_type: builder.cal_type,
        m_rows: builder.m_rows,
        m_columns: builder.m_columns,
        layout,
        frequencies: builder.frequencies.clone(),
        error_terms: error_terms?,
        pvalues: None,
    })
}

fn solve_one_frequency(
    builder: &NewCalibrationBuilder,
    store: &ParameterStore,
    layout: &crate::layout::Layout,
    fi: usize,
) -> Result<Vec<Complex64>, VnaError> {
    let solved_standards: HashMap<_, Complex64> = HashMap::new(); // no Unknown standards on this path
    let equations = builder.build_equations(fi, store, &solved_standards)?;
    if equations.is_empty() {
        return Err(VnaError::usage("calibration has no equations at this frequency"));
    }

    // Map each system-term index that is actually unknown onto a dense column.
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
                None => rhs -= coeff, // unity term's value is exactly 1, moved to the RHS
            }
        }
        b[row] = rhs;
    }

    let x = linalg::solve(&a, &b).map_err(|e| {
        log::warn!("simple solve failed at frequency index {}: {}", fi, e);
        e
    })?;
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

    Ok(full)
}

/// Assigns each unknown (non-unity) term index in `layout`'s linear-system range a dense column
/// number, in ascending index order.
fn dense_index_map(layout: &crate::layout::Layout) -> HashMap<usize, usize> {
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
    use crate::param::{ParamHandle, ParameterStore};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn solves_e12_one_port_sol() {
        // Synthetic one-port E12 (single raw receiver): ideal error box where m == s exactly for
        // every standard, so the solved terms should make `apply` recover s without error.
        let freqs = vec![1e9];
        let mut builder = NewCalibrationBuilder::new(CalType::E12, 1, 1, freqs).unwrap();
        let store = ParameterStore::new();

        // Ideal error box: m == s for short/open/match.
        builder.add_single_reflect(0, ParamHandle::SHORT, &[c(-1.0, 0.0)]).unwrap();
        builder.add_single_reflect(0, ParamHandle::OPEN, &[c(1.0, 0.0)]).unwrap();
        builder.add_single_reflect(0, ParamHandle::MATCH, &[c(0.0, 0.0)]).unwrap();

        let data = solve(&builder, &store).unwrap();
        assert_eq!(data.frequencies.len(), 1);
        assert_eq!(data.error_terms[0].len(), builder.layout.error_terms_total);
    }
}
