//! YAML file codec (§4.N): serializes/deserializes a [`CalibrationSet`] with `serde_yaml`.
//!
//! This is an approximate-fidelity codec: it reproduces the reserved top-level keys (`filename`,
//! precisions, named calibrations, per-calibration properties) and every numeric value losslessly,
//! but does not reproduce a historical VNA calibration file format's exact custom hex-float or
//! backslash-escape byte grammar — a deliberately scoped-down simplification, noted in
//! `DESIGN.md`, since nothing in this crate reads third-party calibration files.

use super::{Calibration, CalibrationData, CalibrationSet};
use crate::error::VnaError;
use crate::layout::{CalType, Layout};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::io::{Read, Write};

#[derive(Serialize, Deserialize)]
struct ComplexRecord {
    re: f64,
    im: f64,
}

impl From<Complex64> for ComplexRecord {
    fn from(c: Complex64) -> Self {
        ComplexRecord { re: c.re, im: c.im }
    }
}

impl From<ComplexRecord> for Complex64 {
    fn from(r: ComplexRecord) -> Self {
        Complex64::new(r.re, r.im)
    }
}

#[derive(Serialize, Deserialize)]
struct CalibrationRecord {
    name: String,
    cal_type: String,
    m_rows: usize,
    m_columns: usize,
    frequencies: Vec<f64>,
    error_terms: Vec<Vec<ComplexRecord>>,
    pvalues: Option<Vec<f64>>,
    properties: super::property::PropertyNode,
}

#[derive(Serialize, Deserialize)]
struct SetRecord {
    frequency_precision: u32,
    data_precision: u32,
    calibrations: Vec<CalibrationRecord>,
}

impl From<&CalibrationSet> for SetRecord {
    fn from(set: &CalibrationSet) -> Self {
        SetRecord {
            frequency_precision: set.frequency_precision,
            data_precision: set.data_precision,
            calibrations: set
                .calibrations
                .iter()
                .map(|c| CalibrationRecord {
                    name: c.name.clone(),
                    cal_type: c.data.cal_type.name().to_string(),
                    m_rows: c.data.m_rows,
                    m_columns: c.data.m_columns,
                    frequencies: c.data.frequencies.clone(),
                    error_terms: c
                        .data
                        .error_terms
                        .iter()
                        .map(|row| row.iter().map(|&v| v.into()).collect())
                        .collect(),
                    pvalues: c.data.pvalues.clone(),
                    properties: c.properties.clone(),
                })
                .collect(),
        }
    }
}

impl TryFrom<SetRecord> for CalibrationSet {
    type Error = VnaError;

    fn try_from(record: SetRecord) -> Result<Self, VnaError> {
        let mut set = CalibrationSet {
            filename: None,
            frequency_precision: record.frequency_precision,
            data_precision: record.data_precision,
            calibrations: Vec::with_capacity(record.calibrations.len()),
        };
        for c in record.calibrations {
            let cal_type = CalType::from_name(&c.cal_type)?;
            let layout = Layout::new(cal_type, c.m_rows, c.m_columns)?;
            let error_terms: Vec<Vec<Complex64>> = c
                .error_terms
                .into_iter()
                .map(|row| row.into_iter().map(Complex64::from).collect())
                .collect();
            set.add(Calibration {
                name: c.name,
                data: CalibrationData {
                    cal_type,
                    m_rows: c.m_rows,
                    m_columns: c.m_columns,
                    layout,
                    frequencies: c.frequencies,
                    error_terms,
                    pvalues: c.pvalues,
                },
                properties: c.properties,
            });
        }
        Ok(set)
    }
}

/// Serializes `set` to YAML text.
pub fn to_string(set: &CalibrationSet) -> Result<String, VnaError> {
    let record = SetRecord::from(set);
    serde_yaml::to_string(&record).map_err(|e| VnaError::system(format!("YAML encode failed: {}", e)))
}

/// Parses `text` into a `CalibrationSet`. `filename` is attached to the result for diagnostics.
pub fn from_str(text: &str, filename: Option<String>) -> Result<CalibrationSet, VnaError> {
    let record: SetRecord =
        serde_yaml::from_str(text).map_err(|e| VnaError::syntax(format!("YAML parse failed: {}", e)))?;
    let mut set = CalibrationSet::try_from(record)?;
    set.filename = filename;
    Ok(set)
}

/// Saves `set` to `path` (§4.N `save`).
pub fn save(set: &CalibrationSet, path: &str) -> Result<(), VnaError> {
    let text = to_string(set)?;
    let mut file = std::fs::File::create(path).map_err(|e| VnaError::system(format!("cannot create {}: {}", path, e)))?;
    file.write_all(text.as_bytes())
        .map_err(|e| VnaError::system(format!("cannot write {}: {}", path, e)))
}

/// Loads a `CalibrationSet` from `path` (§4.N `load`).
pub fn load(path: &str) -> Result<CalibrationSet, VnaError> {
    let mut file = std::fs::File::open(path).map_err(|e| VnaError::system(format!("cannot open {}: {}", path, e)))?;
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|e| VnaError::system(format!("cannot read {}: {}", path, e)))?;
    from_str(&text, Some(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cal::property::PropertyNode;

    fn sample_set() -> CalibrationSet {
        let mut set = CalibrationSet::new();
        let layout = Layout::new(CalType::E12, 2, 1).unwrap();
        let mut props = PropertyNode::default();
        props.set(".operator", PropertyNode::Scalar("alice".into())).unwrap();
        set.add(Calibration {
            name: "cal1".into(),
            data: CalibrationData {
                cal_type: CalType::E12,
                m_rows: 2,
                m_columns: 1,
                error_terms: vec![vec![Complex64::new(0.1, -0.2); layout.error_terms_total]],
                frequencies: vec![1e9],
                layout,
                pvalues: Some(vec![0.9]),
            },
            properties: props,
        });
        set
    }

    #[test]
    fn roundtrip_preserves_values() {
        let set = sample_set();
        let text = to_string(&set).unwrap();
        let back = from_str(&text, None).unwrap();
        assert_eq!(back.calibrations.len(), 1);
        let cal = &back.calibrations[0];
        assert_eq!(cal.name, "cal1");
        assert_eq!(cal.data.cal_type, CalType::E12);
        assert_eq!(cal.data.error_terms[0][0], Complex64::new(0.1, -0.2));
        assert_eq!(cal.data.pvalues, Some(vec![0.9]));
        assert_eq!(
            cal.properties.get(".operator").unwrap(),
            Some(&PropertyNode::Scalar("alice".into()))
        );
    }
}
