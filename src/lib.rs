//! A vector network analyzer calibration engine: error-term solving, linear-equation
//! construction, nonlinear autocalibration, and S-parameter correction application.
//!
//! The crate is organized around the pipeline a calibration goes through:
//!
//! 1. [`param`] holds the reusable standards (ideal match/open/short, user-supplied vectors,
//!    and unknown/correlated parameters the solver refines) in a generational slab.
//! 2. [`standard`] validates a standard's declared port map and tracks which physical ports a
//!    growing calibration has connected.
//! 3. [`layout`] computes the error-term block structure for a calibration type and dimension.
//! 4. [`newcal`] accumulates standard measurements and solver configuration; its `equation`
//!    submodule expands one measured cell into the linear terms it contributes.
//! 5. [`solver`] turns an assembled calibration into solved error terms, picking between a
//!    direct linear solve, the TRL closed form, and nonlinear autocalibration.
//! 6. [`apply`] uses solved error terms to correct a raw measurement into true S-parameters.
//! 7. [`cal`] is the saved/loaded container for one or more solved calibrations, with a
//!    property tree for user metadata and a YAML file codec.
//!
//! [`numeric`] and [`error`] are the ambient numerical and error-handling primitives the rest of
//! the crate is built on.

pub mod apply;
pub mod cal;
pub mod error;
pub mod layout;
pub mod newcal;
pub mod numeric;
pub mod param;
pub mod solver;
pub mod standard;

pub use cal::{Calibration, CalibrationData, CalibrationSet};
pub use error::{VnaError, VnaResult};
pub use layout::{CalType, Layout};
pub use newcal::NewCalibrationBuilder;
pub use param::{ParamHandle, ParameterStore};
