//! Minimal network-parameter conversion (§4.P), enough to let a calkit standard be defined by
//! measured or simulated Z/Y data instead of a closed-form reflection coefficient.

use crate::error::VnaError;
use crate::numeric::rational::{interp, SegmentHint};
use num_complex::Complex64;
use std::sync::Mutex;

/// Reference impedance used for S<->Z/Y conversion; VNA calibration standards are conventionally
/// defined against 50 ohms.
pub const Z0: f64 = 50.0;

/// The parameter kind carried by one frequency point of calkit/network data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    S,
    Z,
    Y,
}

/// A single-port frequency-dependent network quantity (one entry of a calkit's `.s1p`-style
/// table), reduced to an effective reflection coefficient on lookup.
#[derive(Debug)]
pub struct NetworkData {
    kind: NetworkKind,
    freqs: Vec<f64>,
    values: Vec<Complex64>,
    hint: Mutex<SegmentHint>,
}

impl Clone for NetworkData {
    fn clone(&self) -> Self {
        NetworkData {
            kind: self.kind,
            freqs: self.freqs.clone(),
            values: self.values.clone(),
            hint: Mutex::new(*self.hint.lock().unwrap()),
        }
    }
}

impl NetworkData {
    pub fn new(kind: NetworkKind, freqs: Vec<f64>, values: Vec<Complex64>) -> Result<Self, VnaError> {
        if freqs.len() != values.len() || freqs.is_empty() {
            return Err(VnaError::usage("network data: empty or mismatched table"));
        }
        for w in freqs.windows(2) {
            if w[1] <= w[0] {
                return Err(VnaError::usage("network data: frequencies must be strictly ascending"));
            }
        }
        Ok(NetworkData {
            kind,
            freqs,
            values,
            hint: Mutex::new(SegmentHint::default()),
        })
    }

    /// Interpolates the raw (Z/Y/S) sample at `frequency` and converts it to an S-parameter
    /// reflection coefficient against [`Z0`].
    pub fn get_value(&self, frequency: f64) -> Result<Complex64, VnaError> {
        let lo = self.freqs[0];
        let hi = self.freqs[self.freqs.len() - 1];
        if frequency < lo || frequency > hi {
            return Err(VnaError::usage(format!(
                "frequency range: {} Hz is outside the network data's [{}, {}] Hz table",
                frequency, lo, hi
            )));
        }
        let mut hint = self.hint.lock().unwrap();
        let raw = interp(&self.freqs, &self.values, frequency, &mut hint);
        Ok(match self.kind {
            NetworkKind::S => raw,
            NetworkKind::Z => z_to_s(raw, Z0),
            NetworkKind::Y => y_to_s(raw, Z0),
        })
    }
}

/// One-port impedance to reflection coefficient: `S = (Z - Z0) / (Z + Z0)`.
pub fn z_to_s(z: Complex64, z0: f64) -> Complex64 {
    (z - Complex64::new(z0, 0.0)) / (z + Complex64::new(z0, 0.0))
}

/// One-port reflection coefficient to impedance: `Z = Z0 * (1 + S) / (1 - S)`.
pub fn s_to_z(s: Complex64, z0: f64) -> Complex64 {
    Complex64::new(z0, 0.0) * (Complex64::new(1.0, 0.0) + s) / (Complex64::new(1.0, 0.0) - s)
}

/// One-port admittance to reflection coefficient, via `Z = 1/Y`.
pub fn y_to_s(y: Complex64, z0: f64) -> Complex64 {
    z_to_s(Complex64::new(1.0, 0.0) / y, z0)
}

/// One-port reflection coefficient to admittance, via `Y = 1/Z`.
pub fn s_to_y(s: Complex64, z0: f64) -> Complex64 {
    Complex64::new(1.0, 0.0) / s_to_z(s, z0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_impedance_is_zero_reflection() {
        let s = z_to_s(Complex64::new(Z0, 0.0), Z0);
        assert!(s.norm() < 1e-12);
    }

    #[test]
    fn open_circuit_is_unity_reflection() {
        // Y=0 (open) -> Z = infinity is not representable; instead check the dual: Z->infinity
        // limit is approximated by a very large real impedance.
        let s = z_to_s(Complex64::new(1.0e9, 0.0), Z0);
        assert!((s.re - 1.0).abs() < 1e-6);
    }

    #[test]
    fn short_circuit_is_minus_one_reflection() {
        let s = z_to_s(Complex64::new(0.0, 0.0), Z0);
        assert!((s.re + 1.0).abs() < 1e-12);
    }

    #[test]
    fn z_s_roundtrip() {
        let z = Complex64::new(30.0, 15.0);
        let s = z_to_s(z, Z0);
        let back = s_to_z(s, Z0);
        assert!((z - back).norm() < 1e-9);
    }

    #[test]
    fn network_data_out_of_range() {
        let data = NetworkData::new(
            NetworkKind::S,
            vec![1e9, 2e9],
            vec![Complex64::new(0.1, 0.0), Complex64::new(0.2, 0.0)],
        )
        .unwrap();
        assert!(data.get_value(5e9).is_err());
    }
}
