//! Parameter store (§4.B): a generational slab of named, reusable network quantities that the
//! equation builder and solver reference by handle instead of inline value. Mirrors the
//! handle-discipline the orbit code uses for its estimator state (small `Copy` keys into a
//! backing store, never raw indices threaded through call sites).

pub mod network;

use crate::error::VnaError;
use crate::numeric::rational::{interp, SegmentHint};
use crate::numeric::spline::CubicSpline;
use num_complex::Complex64;
use std::sync::Mutex;
use std::collections::HashMap;

/// A generational handle into a [`ParameterStore`]. Stale handles (referencing a deleted slot)
/// are detected via the generation counter rather than silently aliasing a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ParamHandle {
    index: usize,
    generation: u32,
}

impl ParamHandle {
    /// Handle for the ideal match standard (Γ = 0 at all frequencies), predefined per §4.B.
    pub const MATCH: ParamHandle = ParamHandle { index: 0, generation: 0 };
    /// Handle for the ideal open standard (Γ = 1 at all frequencies).
    pub const OPEN: ParamHandle = ParamHandle { index: 1, generation: 0 };
    /// Handle for the ideal short standard (Γ = −1 at all frequencies).
    pub const SHORT: ParamHandle = ParamHandle { index: 2, generation: 0 };
}

/// Maximum relative slack applied when checking whether a query frequency falls within a
/// parameter's declared validity range (§4.B: "ε = 0.01" slack against the nearest table edge).
const FREQUENCY_SLACK: f64 = 0.01;

/// A frequency-dependent scalar value and the policy used to extend it outside its native
/// frequency range.
#[derive(Debug, Clone)]
pub enum Parameter {
    /// A constant reflection/transmission coefficient, valid at any frequency.
    Scalar(Complex64),
    /// A tabulated `(frequency, value)` series, interpolated via rational interpolation.
    Vector { freqs: Vec<f64>, values: Vec<Complex64> },
    /// An unknown standard's parameter: a per-frequency value supplied by the solver once it
    /// converges, initially unset.
    Unknown { initial_guess: Option<Complex64> },
    /// A correlated unknown: like `Unknown`, but constrained to lie near `other`'s value, with a
    /// frequency-dependent standard deviation used to weight the penalty the solver adds for
    /// straying from it (§4.G).
    Correlated {
        initial_guess: Option<Complex64>,
        other: ParamHandle,
        sigma: CubicSpline,
    },
    /// A reference to network data (S/Z/Y) reduced to a scalar/vector through
    /// [`network::NetworkData`] (for calkit entries defined by raw measured data rather than a
    /// closed-form model).
    Data(network::NetworkData),
}

struct Slot {
    generation: u32,
    /// `None` marks a tombstoned (deleted but not yet reusable) slot.
    value: Option<Parameter>,
    refcount: u32,
    hint: Mutex<SegmentHint>,
}

/// The generational-slab parameter store (§4.B). Shared calibration standards (match/open/short,
/// plus any user-defined vector/unknown/correlated parameter) are created once and referenced by
/// handle from many equations.
pub struct ParameterStore {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    by_name: HashMap<String, ParamHandle>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        let mut store = ParameterStore {
            slots: Vec::new(),
            free_list: Vec::new(),
            by_name: HashMap::new(),
        };
        let match_h = store.insert(Parameter::Scalar(Complex64::new(0.0, 0.0)));
        let open_h = store.insert(Parameter::Scalar(Complex64::new(1.0, 0.0)));
        let short_h = store.insert(Parameter::Scalar(Complex64::new(-1.0, 0.0)));
        debug_assert_eq!(match_h, ParamHandle::MATCH);
        debug_assert_eq!(open_h, ParamHandle::OPEN);
        debug_assert_eq!(short_h, ParamHandle::SHORT);
        store
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, value: Parameter) -> ParamHandle {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            slot.refcount = 1;
            ParamHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len();
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
                refcount: 1,
                hint: Mutex::new(SegmentHint::default()),
            });
            ParamHandle { index, generation: 0 }
        }
    }

    pub fn make_scalar(&mut self, value: Complex64) -> ParamHandle {
        self.insert(Parameter::Scalar(value))
    }

    pub fn make_vector(&mut self, freqs: Vec<f64>, values: Vec<Complex64>) -> Result<ParamHandle, VnaError> {
        if freqs.len() != values.len() {
            return Err(VnaError::usage("vector parameter: frequency/value length mismatch"));
        }
        if freqs.is_empty() {
            return Err(VnaError::usage("vector parameter: empty table"));
        }
        for w in freqs.windows(2) {
            if w[1] <= w[0] {
                return Err(VnaError::usage("vector parameter: frequencies must be strictly ascending"));
            }
        }
        Ok(self.insert(Parameter::Vector { freqs, values }))
    }

    pub fn make_unknown(&mut self, initial_guess: Option<Complex64>) -> ParamHandle {
        self.insert(Parameter::Unknown { initial_guess })
    }

    pub fn make_correlated(
        &mut self,
        initial_guess: Option<Complex64>,
        other: ParamHandle,
        sigma_freqs: &[f64],
        sigma_values: &[f64],
    ) -> Result<ParamHandle, VnaError> {
        let sigma = CubicSpline::fit(sigma_freqs, sigma_values)?;
        Ok(self.insert(Parameter::Correlated { initial_guess, other, sigma }))
    }

    pub fn make_data(&mut self, data: network::NetworkData) -> ParamHandle {
        self.insert(Parameter::Data(data))
    }

    /// Associates a name with a handle for lookup via [`ParameterStore::by_name`], per the
    /// property-tree's `parameter.<name>` addressing.
    pub fn set_name(&mut self, name: impl Into<String>, handle: ParamHandle) {
        self.by_name.insert(name.into(), handle);
    }

    pub fn by_name(&self, name: &str) -> Option<ParamHandle> {
        self.by_name.get(name).copied()
    }

    fn slot(&self, handle: ParamHandle) -> Result<&Slot, VnaError> {
        let slot = self
            .slots
            .get(handle.index)
            .ok_or_else(|| VnaError::usage("parameter handle out of range"))?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return Err(VnaError::usage("stale or deleted parameter handle"));
        }
        Ok(slot)
    }

    pub fn get(&self, handle: ParamHandle) -> Result<&Parameter, VnaError> {
        Ok(self.slot(handle)?.value.as_ref().expect("checked above"))
    }

    /// Increments the handle's reference count (called when an equation captures it).
    pub fn retain(&mut self, handle: ParamHandle) -> Result<(), VnaError> {
        self.slot(handle)?; // validate first
        self.slots[handle.index].refcount += 1;
        Ok(())
    }

    /// Decrements the reference count, tombstoning the slot once it reaches zero.
    pub fn delete(&mut self, handle: ParamHandle) -> Result<(), VnaError> {
        self.slot(handle)?;
        let slot = &mut self.slots[handle.index];
        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount == 0 {
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(handle.index);
        }
        Ok(())
    }

    /// Evaluates a parameter's value at `frequency` (§4.B `get_value`). `Unknown`/`Correlated`
    /// parameters require the solver to have written a solved value into `solved`, keyed by
    /// handle; absent an entry, the `initial_guess` (or zero) is used, which only ever happens
    /// before the first solve iteration.
    pub fn get_value(
        &self,
        handle: ParamHandle,
        frequency: f64,
        solved: &HashMap<ParamHandle, Complex64>,
    ) -> Result<Complex64, VnaError> {
        let slot = self.slot(handle)?;
        match slot.value.as_ref().expect("checked above") {
            Parameter::Scalar(v) => Ok(*v),
            Parameter::Vector { freqs, values } => {
                self.check_range(freqs, frequency)?;
                let mut hint = slot.hint.lock().unwrap();
                Ok(interp(freqs, values, frequency, &mut hint))
            }
            Parameter::Unknown { initial_guess } => Ok(solved
                .get(&handle)
                .copied()
                .or(*initial_guess)
                .unwrap_or(Complex64::new(0.0, 0.0))),
            Parameter::Correlated { initial_guess, .. } => Ok(solved
                .get(&handle)
                .copied()
                .or(*initial_guess)
                .unwrap_or(Complex64::new(0.0, 0.0))),
            Parameter::Data(data) => data.get_value(frequency),
        }
    }

    /// Returns the `Correlated` parameter's σ(f), used by the solver to weight its injected row.
    pub fn correlated_sigma(&self, handle: ParamHandle, frequency: f64) -> Result<f64, VnaError> {
        match self.get(handle)? {
            Parameter::Correlated { sigma, .. } => Ok(sigma.eval(frequency)),
            _ => Err(VnaError::usage("correlated_sigma called on a non-Correlated parameter")),
        }
    }

    /// Replaces an `Unknown`/`Correlated` parameter's value with a concrete per-frequency table,
    /// once a closed-form solve (e.g. [`crate::solver::trl`]'s line-propagation extraction) has
    /// determined it. Errors if `handle` doesn't currently hold an `Unknown`/`Correlated`
    /// parameter — resolving an already-known standard would silently discard the caller's value.
    pub fn resolve_to_vector(&mut self, handle: ParamHandle, freqs: Vec<f64>, values: Vec<Complex64>) -> Result<(), VnaError> {
        if freqs.len() != values.len() {
            return Err(VnaError::usage("resolve_to_vector: frequency/value length mismatch"));
        }
        if freqs.is_empty() {
            return Err(VnaError::usage("resolve_to_vector: empty table"));
        }
        for w in freqs.windows(2) {
            if w[1] <= w[0] {
                return Err(VnaError::usage("resolve_to_vector: frequencies must be strictly ascending"));
            }
        }
        let slot = self
            .slots
            .get_mut(handle.index)
            .ok_or_else(|| VnaError::usage("parameter handle out of range"))?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return Err(VnaError::usage("stale or deleted parameter handle"));
        }
        match slot.value.as_ref().expect("checked above") {
            Parameter::Unknown { .. } | Parameter::Correlated { .. } => {}
            _ => return Err(VnaError::usage("resolve_to_vector: parameter is not Unknown/Correlated")),
        }
        slot.value = Some(Parameter::Vector { freqs, values });
        Ok(())
    }

    fn check_range(&self, freqs: &[f64], frequency: f64) -> Result<(), VnaError> {
        let lo = freqs[0];
        let hi = freqs[freqs.len() - 1];
        let span = (hi - lo).max(f64::EPSILON);
        let slack = span * FREQUENCY_SLACK;
        if frequency < lo - slack || frequency > hi + slack {
            return Err(VnaError::usage(format!(
                "frequency range: {} Hz is outside the parameter's [{}, {}] Hz table",
                frequency, lo, hi
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn predefined_standards_have_fixed_handles() {
        let store = ParameterStore::new();
        let solved = HashMap::new();
        assert_eq!(store.get_value(ParamHandle::MATCH, 1e9, &solved).unwrap(), c(0.0, 0.0));
        assert_eq!(store.get_value(ParamHandle::OPEN, 1e9, &solved).unwrap(), c(1.0, 0.0));
        assert_eq!(store.get_value(ParamHandle::SHORT, 1e9, &solved).unwrap(), c(-1.0, 0.0));
    }

    #[test]
    fn vector_param_interpolates() {
        let mut store = ParameterStore::new();
        let h = store
            .make_vector(vec![1e9, 2e9, 3e9], vec![c(1.0, 0.0), c(2.0, 0.0), c(3.0, 0.0)])
            .unwrap();
        let solved = HashMap::new();
        let v = store.get_value(h, 1.5e9, &solved).unwrap();
        assert!((v.re - 1.5).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_query_is_usage_error() {
        let mut store = ParameterStore::new();
        let h = store.make_vector(vec![1e9, 2e9], vec![c(1.0, 0.0), c(2.0, 0.0)]).unwrap();
        let solved = HashMap::new();
        let err = store.get_value(h, 10e9, &solved).unwrap_err();
        assert!(format!("{}", err).contains("frequency range"));
    }

    #[test]
    fn stale_handle_after_delete_is_rejected() {
        let mut store = ParameterStore::new();
        let h = store.make_scalar(c(0.5, 0.5));
        store.delete(h).unwrap();
        assert!(store.get(h).is_err());
    }

    #[test]
    fn unknown_uses_solved_value_once_available() {
        let mut store = ParameterStore::new();
        let h = store.make_unknown(None);
        let mut solved = HashMap::new();
        assert_eq!(store.get_value(h, 1e9, &solved).unwrap(), c(0.0, 0.0));
        solved.insert(h, c(0.9, -0.1));
        assert_eq!(store.get_value(h, 1e9, &solved).unwrap(), c(0.9, -0.1));
    }

    #[test]
    fn correlated_param_tracks_its_other_handle_and_sigma() {
        let mut store = ParameterStore::new();
        let anchor = store.make_unknown(Some(c(0.9, 0.0)));
        let h = store.make_correlated(Some(c(0.85, 0.0)), anchor, &[1e9, 3e9], &[0.01, 0.02]).unwrap();
        match store.get(h).unwrap() {
            Parameter::Correlated { other, .. } => assert_eq!(*other, anchor),
            _ => panic!("expected Correlated"),
        }
        assert!((store.correlated_sigma(h, 2e9).unwrap() - 0.015).abs() < 1e-9);
    }
}
