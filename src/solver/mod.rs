//! Error-term solving (§4.G): turns a fully-built [`crate::newcal::NewCalibrationBuilder`] into
//! per-frequency error terms. Dispatches between three strategies the way the teacher's
//! propagator code dispatches between error-control strategies (small, independently-testable
//! structs selected by a thin entry point rather than one monolithic function):
//!
//! - [`simple`]: direct LU/QR solve, for calibrations with no unknown-valued standards.
//! - [`trl`]: the closed-form TRL fast path, when the standard set matches Thru-Reflect-Line.
//! - [`auto`]: variable-projection Gauss-Newton/Levenberg-Marquardt, for calibrations with one
//!   or more `Unknown`/`Correlated` standards (an unknown reflect, or an unknown-length line).

pub mod auto;
pub mod simple;
pub mod trl;

use crate::cal::CalibrationData;
use crate::error::VnaError;
use crate::newcal::NewCalibrationBuilder;
use crate::param::{Parameter, ParameterStore};

/// True if any standard measurement in `builder` references an `Unknown`/`Correlated`
/// parameter, which makes the system nonlinear and requires [`auto::solve`].
fn has_unknown_standards(builder: &NewCalibrationBuilder, store: &ParameterStore) -> Result<bool, VnaError> {
    for m in &builder.measurements {
        match store.get(m.standard)? {
            Parameter::Unknown { .. } | Parameter::Correlated { .. } => return Ok(true),
            _ => {}
        }
    }
    Ok(false)
}

/// Solves `builder` against `store`, picking the cheapest strategy the standard set supports.
pub fn solve(builder: &mut NewCalibrationBuilder, store: &mut ParameterStore) -> Result<CalibrationData, VnaError> {
    if !builder.is_fully_connected() {
        return Err(VnaError::usage(
            "calibration standards do not connect every physical port; add a through or line",
        ));
    }
    if trl::is_trl_shaped(builder) {
        return trl::solve(builder, store);
    }
    if has_unknown_standards(builder, store)? || builder.config.m_error.is_some() {
        return auto::solve(builder, store);
    }
    simple::solve(builder, store)
}
