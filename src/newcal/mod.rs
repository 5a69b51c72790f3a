//! Calibration construction (§4.E): accumulates standard measurements and solver configuration
//! across repeated `add_*` calls, then hands the assembled problem to [`crate::solver`].

pub mod equation;

use crate::error::VnaError;
use crate::layout::{leakage_index, CalType, Layout};
use crate::param::{ParamHandle, ParameterStore};
use crate::standard::{Connectivity, PortMap};
use equation::{build_cell_equations, Equation};
use num_complex::Complex64;
use std::collections::HashMap;

/// One calibration-standard measurement: a raw ratio recorded at physical cell `(row, col)`
/// across every calibration frequency, against a known (or to-be-solved) standard parameter.
#[derive(Debug, Clone)]
pub struct StandardMeasurement {
    pub system: usize,
    pub row: usize,
    pub col: usize,
    pub standard: ParamHandle,
    pub measured: Vec<Complex64>,
    /// Per-frequency measurement variance, if supplied via an `_m` call; feeds the `noise`
    /// component of [`MError`] instead of the configured default.
    pub variance: Option<Vec<f64>>,
}

/// A leakage (crosstalk) observation: an off-diagonal raw measurement with no direct
/// through-path, averaged rather than solved for.
#[derive(Debug, Clone)]
pub struct LeakageMeasurement {
    pub row: usize,
    pub col: usize,
    pub measured: Vec<Complex64>,
}

/// The raw 2x2 measured matrix of a two-port standard, retained verbatim rather than folded into
/// [`LeakageMeasurement`]'s averaging — [`crate::solver::trl`] needs the thru's and line's
/// transmission cells intact (not pooled with other crosstalk observations) to reconstruct their
/// cascade matrices.
#[derive(Debug, Clone)]
pub struct TwoPortRaw {
    pub port_a: usize,
    pub port_b: usize,
    /// The standard handle applied to the diagonal (reflect) cells.
    pub reflect: ParamHandle,
    /// The standard handle applied to the off-diagonal (transmission) cells — the thru's or
    /// line's own parameter, which [`crate::solver::trl`] resolves in closed form when unknown.
    pub transmission: ParamHandle,
    pub aa: Vec<Complex64>,
    pub ab: Vec<Complex64>,
    pub ba: Vec<Complex64>,
    pub bb: Vec<Complex64>,
}

/// Measurement-error model (§4.G): `noise` is the additive receiver-noise standard deviation;
/// `tracking` is the multiplicative (proportional-to-signal) tracking error, matching the
/// conventional two-term VNA uncertainty budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MError {
    pub noise: f64,
    pub tracking: f64,
}

impl Default for MError {
    fn default() -> Self {
        MError { noise: 1e-5, tracking: 1e-4 }
    }
}

/// Solver configuration set via the builder's `set_*` methods (§4.G). `m_error` is `None` until
/// [`NewCalibrationBuilder::set_m_error`] is called — that absence, not just a set of default
/// values, is what tells [`crate::solver::solve`] whether a measurement-error model is in effect
/// at all, since every default `MError` is nonzero and so can't double as "unset".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    pub p_tolerance: f64,
    pub et_tolerance: f64,
    pub iteration_limit: usize,
    pub pvalue_limit: f64,
    pub m_error: Option<MError>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            p_tolerance: 1e-6,
            et_tolerance: 1e-8,
            iteration_limit: 50,
            pvalue_limit: 0.01,
            m_error: None,
        }
    }
}

/// Accumulates the standards, frequencies, and configuration for one in-progress calibration.
pub struct NewCalibrationBuilder {
    pub cal_type: CalType,
    pub m_rows: usize,
    pub m_columns: usize,
    pub layout: Layout,
    pub frequencies: Vec<f64>,
    pub measurements: Vec<StandardMeasurement>,
    pub leakage: Vec<LeakageMeasurement>,
    pub connectivity: Connectivity,
    pub config: SolverConfig,
    /// Set by [`Self::add_through`]; consumed by [`crate::solver::trl`].
    pub thru_raw: Option<TwoPortRaw>,
    /// Set by [`Self::add_line`]; consumed by [`crate::solver::trl`].
    pub line_raw: Option<TwoPortRaw>,
}

impl NewCalibrationBuilder {
    pub fn new(cal_type: CalType, m_rows: usize, m_columns: usize, frequencies: Vec<f64>) -> Result<Self, VnaError> {
        if frequencies.is_empty() {
            return Err(VnaError::usage("calibration requires at least one frequency"));
        }
        for w in frequencies.windows(2) {
            if w[1] <= w[0] {
                return Err(VnaError::usage("calibration frequencies must be strictly ascending"));
            }
        }
        let layout = Layout::new(cal_type, m_rows, m_columns)?;
        let system_ports = if cal_type.is_column_wise() {
            m_columns
        } else if cal_type.is_t_family() {
            m_columns
        } else {
            m_rows
        };
        Ok(NewCalibrationBuilder {
            cal_type,
            m_rows,
            m_columns,
            layout,
            frequencies,
            measurements: Vec::new(),
            leakage: Vec::new(),
            connectivity: Connectivity::new(system_ports),
            config: SolverConfig::default(),
            thru_raw: None,
            line_raw: None,
        })
    }

    fn check_len(&self, measured: &[Complex64]) -> Result<(), VnaError> {
        if measured.len() != self.frequencies.len() {
            return Err(VnaError::usage(
                "measurement length does not match the calibration's frequency count",
            ));
        }
        Ok(())
    }

    fn system_for_port(&self, port: usize) -> usize {
        if self.cal_type.is_column_wise() {
            port
        } else {
            0
        }
    }

    /// A one-port reflect standard applied at `port` (§4.E).
    pub fn add_single_reflect(
        &mut self,
        port: usize,
        standard: ParamHandle,
        measured: &[Complex64],
    ) -> Result<(), VnaError> {
        self.check_len(measured)?;
        self.connectivity.record(&PortMap::new(vec![port])?)?;
        self.measurements.push(StandardMeasurement {
            system: self.system_for_port(port),
            row: port,
            col: port,
            standard,
            measured: measured.to_vec(),
            variance: None,
        });
        Ok(())
    }

    /// Measurement-error-annotated variant of [`Self::add_single_reflect`].
    pub fn add_single_reflect_m(
        &mut self,
        port: usize,
        standard: ParamHandle,
        measured: &[Complex64],
        variance: &[f64],
    ) -> Result<(), VnaError> {
        self.add_single_reflect(port, standard, measured)?;
        self.check_len_f64(variance)?;
        self.measurements.last_mut().unwrap().variance = Some(variance.to_vec());
        Ok(())
    }

    fn check_len_f64(&self, v: &[f64]) -> Result<(), VnaError> {
        if v.len() != self.frequencies.len() {
            return Err(VnaError::usage(
                "variance length does not match the calibration's frequency count",
            ));
        }
        Ok(())
    }

    /// Two independent one-port reflects applied simultaneously at `port_a`/`port_b`.
    pub fn add_double_reflect(
        &mut self,
        port_a: usize,
        standard_a: ParamHandle,
        measured_a: &[Complex64],
        port_b: usize,
        standard_b: ParamHandle,
        measured_b: &[Complex64],
    ) -> Result<(), VnaError> {
        self.add_single_reflect(port_a, standard_a, measured_a)?;
        self.add_single_reflect(port_b, standard_b, measured_b)?;
        Ok(())
    }

    pub fn add_double_reflect_m(
        &mut self,
        port_a: usize,
        standard_a: ParamHandle,
        measured_a: &[Complex64],
        variance_a: &[f64],
        port_b: usize,
        standard_b: ParamHandle,
        measured_b: &[Complex64],
        variance_b: &[f64],
    ) -> Result<(), VnaError> {
        self.add_single_reflect_m(port_a, standard_a, measured_a, variance_a)?;
        self.add_single_reflect_m(port_b, standard_b, measured_b, variance_b)?;
        Ok(())
    }

    /// A matched, reciprocal through connecting `port_a` and `port_b`: the diagonal cells see an
    /// (assumed matched) reflect of `reflect` and the off-diagonal cells see the transmission
    /// parameter `thru` — which, for a diagonal (T8/U8/TE10/UE10) error-term layout, is routed
    /// to the leakage accumulator instead of the linear system, since those types have no
    /// off-diagonal unknowns.
    fn add_two_port_standard(
        &mut self,
        port_a: usize,
        port_b: usize,
        reflect: ParamHandle,
        transmission: ParamHandle,
        measured_aa: &[Complex64],
        measured_ab: &[Complex64],
        measured_ba: &[Complex64],
        measured_bb: &[Complex64],
    ) -> Result<(), VnaError> {
        self.check_len(measured_aa)?;
        self.check_len(measured_ab)?;
        self.check_len(measured_ba)?;
        self.check_len(measured_bb)?;
        self.connectivity.record(&PortMap::new(vec![port_a, port_b])?)?;

        self.push_cell_or_leakage(port_a, port_a, reflect, measured_aa);
        self.push_cell_or_leakage(port_b, port_b, reflect, measured_bb);
        self.push_cell_or_leakage(port_a, port_b, transmission, measured_ab);
        self.push_cell_or_leakage(port_b, port_a, transmission, measured_ba);
        Ok(())
    }

    pub fn add_through(
        &mut self,
        port_a: usize,
        port_b: usize,
        reflect: ParamHandle,
        thru: ParamHandle,
        measured_aa: &[Complex64],
        measured_ab: &[Complex64],
        measured_ba: &[Complex64],
        measured_bb: &[Complex64],
    ) -> Result<(), VnaError> {
        self.add_two_port_standard(port_a, port_b, reflect, thru, measured_aa, measured_ab, measured_ba, measured_bb)?;
        self.thru_raw = Some(TwoPortRaw {
            port_a,
            port_b,
            reflect,
            transmission: thru,
            aa: measured_aa.to_vec(),
            ab: measured_ab.to_vec(),
            ba: measured_ba.to_vec(),
            bb: measured_bb.to_vec(),
        });
        Ok(())
    }

    /// A two-port standard of known (or unknown, for TRL's line) transmission `line`, otherwise
    /// identical in shape to [`Self::add_through`] — used for TRL's Line standard.
    pub fn add_line(
        &mut self,
        port_a: usize,
        port_b: usize,
        reflect: ParamHandle,
        line: ParamHandle,
        measured_aa: &[Complex64],
        measured_ab: &[Complex64],
        measured_ba: &[Complex64],
        measured_bb: &[Complex64],
    ) -> Result<(), VnaError> {
        self.add_two_port_standard(port_a, port_b, reflect, line, measured_aa, measured_ab, measured_ba, measured_bb)?;
        self.line_raw = Some(TwoPortRaw {
            port_a,
            port_b,
            reflect,
            transmission: line,
            aa: measured_aa.to_vec(),
            ab: measured_ab.to_vec(),
            ba: measured_ba.to_vec(),
            bb: measured_bb.to_vec(),
        });
        Ok(())
    }

    fn push_cell_or_leakage(&mut self, row: usize, col: usize, standard: ParamHandle, measured: &[Complex64]) {
        let is_direct = row == col || self.cal_type.is_dense();
        if is_direct {
            self.measurements.push(StandardMeasurement {
                system: self.system_for_port(if self.cal_type.is_column_wise() { col } else { 0 }),
                row,
                col,
                standard,
                measured: measured.to_vec(),
                variance: None,
            });
        } else if self.cal_type.has_leakage() {
            self.leakage.push(LeakageMeasurement {
                row,
                col,
                measured: measured.to_vec(),
            });
        }
        // Diagonal types with no leakage support (T8/U8) simply drop genuinely off-diagonal
        // cells: they carry no information the linear system or a leakage average can use.
    }

    /// The fully general standard: every `(map.ports[i], map.ports[j])` raw cell against
    /// `standards[i][j]`, for an arbitrary multi-port standard.
    pub fn add_mapped_matrix(
        &mut self,
        map: PortMap,
        standards: Vec<Vec<ParamHandle>>,
        measured: Vec<Vec<Vec<Complex64>>>,
    ) -> Result<(), VnaError> {
        let n = map.len();
        if standards.len() != n || measured.len() != n {
            return Err(VnaError::usage("add_mapped_matrix: standard/measurement matrix size mismatch"));
        }
        self.connectivity.record(&map)?;
        for i in 0..n {
            if standards[i].len() != n || measured[i].len() != n {
                return Err(VnaError::usage("add_mapped_matrix: standard/measurement matrix size mismatch"));
            }
            for j in 0..n {
                self.check_len(&measured[i][j])?;
                self.push_cell_or_leakage(map.ports[i], map.ports[j], standards[i][j], &measured[i][j]);
            }
        }
        Ok(())
    }

    pub fn add_mapped_matrix_m(
        &mut self,
        map: PortMap,
        standards: Vec<Vec<ParamHandle>>,
        measured: Vec<Vec<Vec<Complex64>>>,
        variance: Vec<Vec<Vec<f64>>>,
    ) -> Result<(), VnaError> {
        let before = self.measurements.len();
        self.add_mapped_matrix(map, standards, measured)?;
        let mut idx = 0;
        for row_variance in variance {
            for v in row_variance {
                self.check_len_f64(&v)?;
                if let Some(m) = self.measurements.get_mut(before + idx) {
                    m.variance = Some(v);
                }
                idx += 1;
            }
        }
        Ok(())
    }

    pub fn set_p_tolerance(&mut self, v: f64) {
        self.config.p_tolerance = v;
    }
    pub fn set_et_tolerance(&mut self, v: f64) {
        self.config.et_tolerance = v;
    }
    pub fn set_iteration_limit(&mut self, v: usize) {
        self.config.iteration_limit = v;
    }
    pub fn set_pvalue_limit(&mut self, v: f64) {
        self.config.pvalue_limit = v;
    }
    pub fn set_m_error(&mut self, m_error: MError) {
        self.config.m_error = Some(m_error);
    }

    /// True once every physical port is connected, directly or transitively, to every other —
    /// the precondition checked before solving (§4.E/§4.I).
    pub fn is_fully_connected(&mut self) -> bool {
        self.connectivity.is_fully_connected()
    }

    /// Builds the complete set of equations for frequency index `fi`, evaluating every standard
    /// against the current `solved` map (empty before the first solver iteration; refreshed on
    /// each outer Gauss-Newton/Levenberg-Marquardt pass for standards with `Unknown`/`Correlated`
    /// parameters).
    pub fn build_equations(
        &self,
        fi: usize,
        store: &ParameterStore,
        solved: &HashMap<ParamHandle, Complex64>,
    ) -> Result<Vec<Equation>, VnaError> {
        let freq = self.frequencies[fi];
        let mut equations = Vec::with_capacity(self.measurements.len());
        for m in &self.measurements {
            let s_value = store.get_value(m.standard, freq, solved)?;
            let weight = self.equation_weight(m, fi);
            let mut cell_eqs = build_cell_equations(&self.layout, m.system, m.row, m.col, m.measured[fi], s_value);
            for eq in cell_eqs.iter_mut() {
                eq.weight = weight;
            }
            equations.append(&mut cell_eqs);
        }
        Ok(equations)
    }

    /// The row weight `w = 1/sqrt(sigma_nf^2 + |m|^2 * sigma_tr^2)` for measurement `m` at
    /// frequency index `fi` (§4.G). `1.0` (unweighted) when no measurement-error model is
    /// configured, matching [`crate::solver::simple`]'s unweighted normal equations exactly.
    fn equation_weight(&self, m: &StandardMeasurement, fi: usize) -> f64 {
        let me = match &self.config.m_error {
            Some(me) => me,
            None => return 1.0,
        };
        let sigma_nf2 = m.variance.as_ref().map(|v| v[fi]).unwrap_or(me.noise * me.noise);
        let sigma_tr2 = me.tracking * me.tracking;
        let variance = sigma_nf2 + m.measured[fi].norm_sqr() * sigma_tr2;
        if variance > 0.0 {
            1.0 / variance.sqrt()
        } else {
            1.0
        }
    }

    /// Averages every leakage observation at frequency index `fi` into the flat leakage-term
    /// vector (§4.F: leakage is estimated, never solved for).
    pub fn estimate_leakage(&self, fi: usize) -> Vec<Complex64> {
        self.estimate_leakage_with_variance(fi).0
    }

    /// As [`Self::estimate_leakage`], but also returns, per leakage cell with at least two
    /// samples, the sample variance `sumsq - |sum|^2/n` of the raw observations pooled into it —
    /// the spread the averaging step discards, needed by [`Self::leakage_chisq_contribution`].
    fn estimate_leakage_with_variance(&self, fi: usize) -> (Vec<Complex64>, Vec<f64>) {
        let mut sums = vec![Complex64::new(0.0, 0.0); self.layout.el_terms];
        let mut sumsq = vec![0.0f64; self.layout.el_terms];
        let mut counts = vec![0u32; self.layout.el_terms];
        for obs in &self.leakage {
            if let Some(idx) = leakage_index(self.m_rows, self.m_columns, obs.row, obs.col) {
                let v = obs.measured[fi];
                sums[idx] += v;
                sumsq[idx] += v.norm_sqr();
                counts[idx] += 1;
            }
        }
        let mut variances = vec![0.0f64; self.layout.el_terms];
        for idx in 0..self.layout.el_terms {
            let count = counts[idx];
            if count > 0 {
                sums[idx] /= count as f64;
            }
            if count >= 2 {
                variances[idx] = (sumsq[idx] - sums[idx].norm_sqr() * count as f64).max(0.0);
            }
        }
        (sums, variances)
    }

    /// The leakage contribution to the outer solver's chi-squared (§4.G): the pooled sample
    /// variance of every leakage cell's raw observations, weighted by `w_l = 1/noise^2`. `0` when
    /// no measurement-error model is configured — leakage spread then has nothing to be weighed
    /// against.
    pub fn leakage_chisq_contribution(&self, fi: usize) -> f64 {
        let me = match &self.config.m_error {
            Some(me) => me,
            None => return 0.0,
        };
        let w_l = 1.0 / (me.noise * me.noise);
        let (_, variances) = self.estimate_leakage_with_variance(fi);
        variances.iter().sum::<f64>() * w_l
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParameterStore;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn te10_two_port_short_open_thru_is_connected_and_builds() {
        let freqs = vec![1e9, 2e9];
        let mut builder = NewCalibrationBuilder::new(CalType::TE10, 2, 2, freqs).unwrap();
        let store = ParameterStore::new();

        builder
            .add_double_reflect(0, ParamHandle::SHORT, &[c(-1.0, 0.0), c(-1.0, 0.0)], 1, ParamHandle::SHORT, &[c(-1.0, 0.0), c(-1.0, 0.0)])
            .unwrap();
        builder
            .add_through(0, 1, ParamHandle::MATCH, ParamHandle::OPEN, &[c(0.0, 0.0); 2], &[c(0.9, 0.0); 2], &[c(0.9, 0.0); 2], &[c(0.0, 0.0); 2])
            .unwrap();

        assert!(builder.is_fully_connected());
        let solved = HashMap::new();
        let eqs = builder.build_equations(0, &store, &solved).unwrap();
        assert!(!eqs.is_empty());
        assert_eq!(builder.leakage.len(), 2); // the two off-diagonal through cells
    }

    #[test]
    fn single_reflect_alone_is_not_fully_connected_for_two_ports() {
        let mut builder = NewCalibrationBuilder::new(CalType::E12, 2, 1, vec![1e9]).unwrap();
        builder.add_single_reflect(0, ParamHandle::SHORT, &[c(-1.0, 0.0)]).unwrap();
        assert!(builder.is_fully_connected()); // single-port system: trivially connected
    }

    #[test]
    fn config_setters_apply() {
        let mut builder = NewCalibrationBuilder::new(CalType::T8, 2, 2, vec![1e9]).unwrap();
        builder.set_iteration_limit(10);
        builder.set_pvalue_limit(0.05);
        assert_eq!(builder.config.iteration_limit, 10);
        assert_eq!(builder.config.pvalue_limit, 0.05);
    }
}
