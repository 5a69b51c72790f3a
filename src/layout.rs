//! Error-term layout algebra (§4.C): pure functions that, given a calibration type and the
//! raw-measurement matrix dimensions, compute the block structure of the solved error terms —
//! offsets, counts, diagonality, and the position of the term that is constrained to unity.
//!
//! # Resolved design decision (see DESIGN.md)
//!
//! The eight calibration types fall into two dual families, `M = (Ts·S + Ti)(Tx·S + Tm)⁻¹`
//! (T-family) and `S = (Um·M + Ui)(Ux·M + Us)⁻¹` (U-family). Both closed forms require their
//! four blocks to be square `N×N` matrices acting on a square `N×N` network, which only has a
//! consistent dimensional reading when `m_rows == m_columns == N`. This crate implements the
//! T8/TE10/T16/U8/UE10/U16 closed forms for that square case (every worked example in the
//! specification's §8 is either square or routes through UE14/E12). The genuinely rectangular
//! case (`m_rows != m_columns`) is handled by UE14/E12, whose per-column decomposition is
//! dimension-agnostic by construction: each of the `m_columns` independent systems relates one
//! DUT port's column of `S` to all `m_rows` raw receivers via a diagonal-per-receiver bilinear
//! relation, so `m_rows` may exceed `m_columns` freely.

use crate::error::VnaError;
use std::fmt;

/// The nine calibration-type tags of §3, including the internal E12→UE14 bridge representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CalType {
    T8,
    TE10,
    T16,
    U8,
    UE10,
    U16,
    UE14,
    E12,
}

impl CalType {
    /// Parses a case-insensitive type name, per §6's `name_to_type`.
    pub fn from_name(name: &str) -> Result<Self, VnaError> {
        match name.to_ascii_uppercase().as_str() {
            "T8" => Ok(CalType::T8),
            "TE10" => Ok(CalType::TE10),
            "T16" => Ok(CalType::T16),
            "U8" => Ok(CalType::U8),
            "UE10" => Ok(CalType::UE10),
            "U16" => Ok(CalType::U16),
            "UE14" => Ok(CalType::UE14),
            "E12" => Ok(CalType::E12),
            _ => Err(VnaError::usage(format!("unknown calibration type name: {}", name))),
        }
    }

    /// `type_to_name`: the canonical upper-case string name.
    pub fn name(self) -> &'static str {
        match self {
            CalType::T8 => "T8",
            CalType::TE10 => "TE10",
            CalType::T16 => "T16",
            CalType::U8 => "U8",
            CalType::UE10 => "UE10",
            CalType::U16 => "U16",
            CalType::UE14 => "UE14",
            CalType::E12 => "E12",
        }
    }

    /// True for the T-family (`M = (Ts S + Ti)(Tx S + Tm)^-1`); these require `m_rows <=
    /// m_columns`.
    pub fn is_t_family(self) -> bool {
        matches!(self, CalType::T8 | CalType::TE10 | CalType::T16)
    }

    /// True for the U-family (`S = (Um M + Ui)(Ux M + Us)^-1`) plus E12; these require
    /// `m_rows >= m_columns`.
    pub fn is_u_family(self) -> bool {
        matches!(
            self,
            CalType::U8 | CalType::UE10 | CalType::U16 | CalType::UE14 | CalType::E12
        )
    }

    /// True when the T/U blocks are dense (`T16`/`U16`) rather than diagonal.
    pub fn is_dense(self) -> bool {
        matches!(self, CalType::T16 | CalType::U16)
    }

    /// True when an off-diagonal leakage matrix `El` exists outside the linear system.
    pub fn has_leakage(self) -> bool {
        matches!(
            self,
            CalType::TE10 | CalType::UE10 | CalType::UE14 | CalType::E12
        )
    }

    /// True when this type is solved column-wise as `m_columns` independent systems.
    pub fn is_column_wise(self) -> bool {
        matches!(self, CalType::UE14 | CalType::E12)
    }

    /// The type this calibration is actually solved as. E12 is solved as UE14 (§3).
    pub fn solved_as(self) -> CalType {
        match self {
            CalType::E12 => CalType::UE14,
            other => other,
        }
    }

    /// Validates `(m_rows, m_columns)` against this type's dimensional requirement.
    pub fn validate_dims(self, m_rows: usize, m_columns: usize) -> Result<(), VnaError> {
        if m_rows == 0 || m_columns == 0 {
            return Err(VnaError::usage("calibration dimensions must be positive"));
        }
        if self.is_t_family() && m_rows > m_columns {
            return Err(VnaError::usage(format!(
                "{} requires m_rows <= m_columns, got {}x{}",
                self.name(),
                m_rows,
                m_columns
            )));
        }
        if self.is_u_family() && m_rows < m_columns {
            return Err(VnaError::usage(format!(
                "{} requires m_rows >= m_columns, got {}x{}",
                self.name(),
                m_rows,
                m_columns
            )));
        }
        if !self.is_column_wise() && m_rows != m_columns {
            return Err(VnaError::usage(format!(
                "{} requires a square measurement (m_rows == m_columns); rectangular \
                 calibrations are only supported by UE14/E12",
                self.name()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single error-term family within a system (`Ts`, `Ti`, `Tx`, `Tm` for T-family; `Um`, `Ui`,
/// `Ux`, `Us` for U-family; `Er`, `Em` for E12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub offset: usize,
    pub len: usize,
}

/// The computed block structure for one calibration (§4.C). All offsets are relative to the
/// start of a single system's term slice; for column-wise types (`UE14`/`E12`), each of the
/// `systems` systems occupies `system_stride` consecutive slots in the full per-frequency term
/// vector (leakage terms, if any, follow immediately after all systems).
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub cal_type: CalType,
    pub m_rows: usize,
    pub m_columns: usize,
    /// Number of independent linear systems: 1 for every type except UE14/E12.
    pub systems: usize,
    /// `N` for the square T/U families; `m_rows` for the per-column UE14/E12 systems.
    pub block_dim: usize,
    /// Number of term families per system (4 for T8/TE10/T16/U8/UE10/U16/UE14, 2 for E12).
    pub families: usize,
    /// Block ranges within one system's term slice, in family order.
    pub blocks: Vec<BlockRange>,
    /// Total unknown+fixed terms stored per system (sum of `blocks[].len`).
    pub system_stride: usize,
    /// Index, within a system's term slice, of the term fixed to unity (`None` for E12, which
    /// has no unity term).
    pub unity_index: Option<usize>,
    /// Number of off-diagonal leakage cells, stored once for the whole calibration (not
    /// per-system).
    pub el_terms: usize,
    /// Offset of the leakage block within the full per-frequency term vector.
    pub el_offset: usize,
    /// Total stored terms across all systems plus leakage.
    pub error_terms_total: usize,
}

impl Layout {
    /// Computes the layout for `(cal_type, m_rows, m_columns)` (§4.C). `cal_type` is the
    /// *declared* type (E12 is not pre-converted to UE14 by the caller).
    pub fn new(cal_type: CalType, m_rows: usize, m_columns: usize) -> Result<Self, VnaError> {
        cal_type.validate_dims(m_rows, m_columns)?;

        let (systems, block_dim, families, block_len, unity_index) = if cal_type.is_column_wise()
        {
            let block_dim = m_rows;
            match cal_type {
                CalType::UE14 => (m_columns, block_dim, 4, block_dim, None),
                CalType::E12 => (m_columns, block_dim, 2, block_dim, None),
                _ => unreachable!(),
            }
        } else {
            let n = m_rows; // == m_columns, enforced by validate_dims
            let block_len = if cal_type.is_dense() { n * n } else { n };
            // Unity term is the first slot of the last family (Tm for T-family, Um for
            // U-family is the *first* family instead -- see §3).
            let unity_index = if cal_type.is_t_family() {
                Some(3 * block_len) // Tm is the 4th family; tm11 is its first entry.
            } else {
                Some(0) // Um is the 1st family; um11 is its first entry.
            };
            (1usize, n, 4usize, block_len, unity_index)
        };

        let mut blocks = Vec::with_capacity(families);
        let mut offset = 0;
        for _ in 0..families {
            blocks.push(BlockRange {
                offset,
                len: block_len,
            });
            offset += block_len;
        }
        let system_stride = offset;

        // UE14/E12's unity term is column-dependent: um_q[q] within system q's first family.
        let unity_index = if cal_type.is_column_wise() && cal_type == CalType::UE14 {
            None // computed per-system by `unity_index_for_system`
        } else {
            unity_index
        };

        let el_terms = if cal_type.has_leakage() {
            m_rows * m_columns - m_rows.min(m_columns)
        } else {
            0
        };
        let el_offset = systems * system_stride;
        let error_terms_total = el_offset + el_terms;

        Ok(Layout {
            cal_type,
            m_rows,
            m_columns,
            systems,
            block_dim,
            families,
            blocks,
            system_stride,
            unity_index,
            el_terms,
            el_offset,
            error_terms_total,
        })
    }

    /// The term index, within a system's term slice, fixed to unity for UE14's `system`-th
    /// column (§3: "the column-dependent position"). `None` for E12 and for any type whose
    /// unity term does not depend on the system index (use [`Layout::unity_index`] there).
    pub fn unity_index_for_system(&self, system: usize) -> Option<usize> {
        match self.cal_type {
            CalType::UE14 => Some(system), // um_q[q]: position q within the first family (um_q).
            CalType::E12 => None,
            _ => self.unity_index,
        }
    }

    /// Absolute offset of `system`'s term slice within the full per-frequency term vector.
    pub fn system_offset(&self, system: usize) -> usize {
        system * self.system_stride
    }

    /// The block range for family `family_index` (0-based, in declaration order) of `system`,
    /// as an absolute range into the full per-frequency term vector.
    pub fn family_range(&self, system: usize, family_index: usize) -> std::ops::Range<usize> {
        let base = self.system_offset(system);
        let blk = self.blocks[family_index];
        (base + blk.offset)..(base + blk.offset + blk.len)
    }

    /// Number of unknowns (excluding fixed-unity terms) across the whole calibration's linear
    /// system(s), not counting leakage (leakage is estimated by averaging, never solved for).
    pub fn unknown_count(&self) -> usize {
        let mut total = self.systems * self.system_stride;
        if self.cal_type == CalType::UE14 {
            total -= self.systems; // one unity term per column system
        } else if let Some(_) = self.unity_index {
            total -= self.systems; // one unity term total (systems == 1 here)
        }
        total
    }
}

/// Index of raw cell `(row, col)` within the flat leakage-term vector, or `None` if `(row, col)`
/// lies on the direct (non-leakage) path. Cells are enumerated row-major, skipping every cell
/// with `row == col` (the diagonal, which always has a direct path regardless of shape).
pub fn leakage_index(m_rows: usize, m_columns: usize, row: usize, col: usize) -> Option<usize> {
    if row == col {
        return None;
    }
    let mut idx = 0;
    for r in 0..m_rows {
        for c in 0..m_columns {
            if r == c {
                continue;
            }
            if r == row && c == col {
                return Some(idx);
            }
            idx += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        for t in [
            CalType::T8,
            CalType::TE10,
            CalType::T16,
            CalType::U8,
            CalType::UE10,
            CalType::U16,
            CalType::UE14,
            CalType::E12,
        ] {
            assert_eq!(CalType::from_name(t.name()).unwrap(), t);
            assert_eq!(CalType::from_name(&t.name().to_ascii_lowercase()).unwrap(), t);
        }
    }

    #[test]
    fn t8_square_layout() {
        let layout = Layout::new(CalType::T8, 2, 2).unwrap();
        assert_eq!(layout.systems, 1);
        assert_eq!(layout.families, 4);
        assert_eq!(layout.system_stride, 8); // 4 families * 2 diag terms
        assert_eq!(layout.unity_index, Some(6)); // Tm family starts at offset 6
        assert_eq!(layout.unknown_count(), 7);
        assert_eq!(layout.el_terms, 0);
    }

    #[test]
    fn t16_square_layout_is_dense() {
        let layout = Layout::new(CalType::T16, 3, 3).unwrap();
        assert_eq!(layout.system_stride, 4 * 9);
        assert_eq!(layout.unknown_count(), 4 * 9 - 1);
    }

    #[test]
    fn te10_adds_leakage() {
        let layout = Layout::new(CalType::TE10, 2, 2).unwrap();
        assert_eq!(layout.el_terms, 2); // 2x2 - 2 diagonal-like cells
        assert_eq!(layout.error_terms_total, 8 + 2);
    }

    #[test]
    fn ue14_is_column_wise_and_rectangular() {
        let layout = Layout::new(CalType::UE14, 3, 2).unwrap();
        assert_eq!(layout.systems, 2);
        assert_eq!(layout.block_dim, 3);
        assert_eq!(layout.system_stride, 4 * 3);
        assert_eq!(layout.unity_index_for_system(0), Some(0));
        assert_eq!(layout.unity_index_for_system(1), Some(1));
        assert_eq!(layout.unknown_count(), 2 * 12 - 2);
    }

    #[test]
    fn e12_has_no_unity_term() {
        let layout = Layout::new(CalType::E12, 2, 1).unwrap();
        assert_eq!(layout.systems, 1);
        assert_eq!(layout.families, 2);
        assert_eq!(layout.unity_index_for_system(0), None);
        assert_eq!(layout.unknown_count(), layout.systems * layout.system_stride);
    }

    #[test]
    fn rejects_rectangular_t16() {
        assert!(Layout::new(CalType::T16, 2, 3).is_err());
        assert!(Layout::new(CalType::T16, 3, 2).is_err());
    }

    #[test]
    fn leakage_index_skips_diagonal() {
        assert_eq!(leakage_index(2, 2, 0, 0), None);
        assert_eq!(leakage_index(2, 2, 0, 1), Some(0));
        assert_eq!(leakage_index(2, 2, 1, 0), Some(1));
    }

    #[test]
    fn rejects_wrong_direction_dims() {
        assert!(Layout::new(CalType::T8, 3, 2).is_err()); // T requires rows <= columns
        assert!(Layout::new(CalType::U8, 2, 3).is_err()); // U requires rows >= columns
    }
}
