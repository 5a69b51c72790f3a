//! Linear-equation generation (§4.F): turns one standard measurement, at one frequency, into
//! the set of complex linear terms it contributes to the calibration's normal equations.
//!
//! Every calibration type reduces to the same element-wise identity once its error-term matrices
//! are expanded: for the T-family, `M(Tx S + Tm) - (Ts S + Ti) = 0`; for the U-family (including
//! UE14/E12's per-column systems), `S(Ux M + Us) - (Um M + Ui) = 0`. Each scalar equation is a
//! sum of monomials of the form `± M_cell · S_cell · x[index]`, where `x` is the calibration's
//! flat unknown vector (§4.C's [`crate::layout::Layout`]) and the unity-fixed term contributes a
//! monomial with an implicit coefficient of `1` rather than an indexed unknown.

use crate::layout::{CalType, Layout};
use num_complex::Complex64;

/// One monomial of a linear calibration equation: `coefficient · x[x_index]`, where `coefficient
/// = (negative ? -1 : 1) · m_value · s_value`. A `None` `x_index` represents the fixed unity
/// term, whose value is always exactly `1` and is folded into the equation's right-hand side by
/// the caller instead of being solved for.
#[derive(Debug, Clone, Copy)]
pub struct Term {
    pub x_index: Option<usize>,
    pub negative: bool,
    pub m_value: Complex64,
    pub s_value: Complex64,
}

impl Term {
    /// The monomial's coefficient, with sign folded in.
    pub fn coefficient(&self) -> Complex64 {
        let c = self.m_value * self.s_value;
        if self.negative {
            -c
        } else {
            c
        }
    }
}

/// One fully-expanded scalar equation: `Σ terms = 0`. Terms whose `x_index` is `None` (the
/// unity-fixed term) are moved to the right-hand side by the caller when assembling the normal
/// equations (`Σ_{x_index=Some} term = -Σ_{x_index=None} term`).
///
/// `weight` scales the whole row in the normal equations; [`build_cell_equations`] always leaves
/// it at its default of `1` (unweighted) since weighting depends on the measurement-error model,
/// which lives on the builder, not here — the builder multiplies it in once the equation comes
/// back.
#[derive(Debug, Clone)]
pub struct Equation {
    pub terms: Vec<Term>,
    pub weight: f64,
}

impl Default for Equation {
    fn default() -> Self {
        Equation { terms: Vec::new(), weight: 1.0 }
    }
}

impl Equation {
    pub fn push(&mut self, term: Term) {
        self.terms.push(term);
    }
}

/// Builds the equations contributed by one standard measurement cell `(row, col)` of the raw
/// matrix `m`, given the standard's known (or current-guess) S-parameter value `s`, at the
/// system identified by `layout`/`system` (`system` is always `0` except for UE14/E12, whose
/// `m_columns` independent systems are indexed by DUT port).
///
/// Returns one equation per raw measurement row touched (for the T-family, one equation per row
/// `r` of `m_rows`; for the U-family, one equation for the single DUT-port column `col`).
pub fn build_cell_equations(
    layout: &Layout,
    system: usize,
    row: usize,
    col: usize,
    m_value: Complex64,
    s_value: Complex64,
) -> Vec<Equation> {
    match layout.cal_type.solved_as() {
        CalType::T8 | CalType::TE10 | CalType::T16 => t_family_equation(layout, row, col, m_value, s_value),
        CalType::U8 | CalType::UE10 | CalType::U16 => u_family_equation(layout, row, col, m_value, s_value),
        CalType::UE14 => ue14_equation(layout, system, row, m_value, s_value),
        CalType::E12 => unreachable!("E12 is solved as UE14"),
    }
}

/// Index, within the (single) system's term slice, of family `family` (0=Ts/Um .. 3=Tm/Us)'s
/// cell `(r, c)`. Dense types index `r*N + c`; diagonal types only have a cell when `r == c`,
/// addressed at offset `r`.
fn cell_index(layout: &Layout, family: usize, r: usize, c: usize) -> Option<usize> {
    let blk = layout.blocks[family];
    if layout.cal_type.is_dense() {
        Some(blk.offset + r * layout.block_dim + c)
    } else if r == c {
        Some(blk.offset + r)
    } else {
        None
    }
}

fn is_unity(layout: &Layout, family: usize, r: usize, c: usize) -> bool {
    match cell_index(layout, family, r, c) {
        Some(idx) => layout.unity_index == Some(idx),
        None => false,
    }
}

fn term_at(layout: &Layout, family: usize, r: usize, c: usize, negative: bool, m_value: Complex64, s_value: Complex64) -> Option<Term> {
    cell_index(layout, family, r, c).map(|idx| Term {
        x_index: if is_unity(layout, family, r, c) { None } else { Some(idx) },
        negative,
        m_value,
        s_value,
    })
}

/// `M(Tx S + Tm) - (Ts S + Ti) = 0`, expanded for raw cell `(row, col)` of `M` against a known
/// S-cell value at `(row, col)` (off-diagonal cells of diagonal-block types contribute no
/// `Ts`/`Tx` terms, matching the diagonal assumption documented in [`crate::layout`]).
fn t_family_equation(layout: &Layout, row: usize, col: usize, m_value: Complex64, s_value: Complex64) -> Vec<Equation> {
    let mut eq = Equation::default();
    // families: 0=Ts, 1=Ti, 2=Tx, 3=Tm
    if let Some(t) = term_at(layout, 2, row, col, false, m_value, s_value) {
        eq.push(t); // +M*Tx*S
    }
    if let Some(t) = term_at(layout, 3, row, col, false, m_value, Complex64::new(1.0, 0.0)) {
        eq.push(t); // +M*Tm
    }
    if let Some(t) = term_at(layout, 0, row, col, true, Complex64::new(1.0, 0.0), s_value) {
        eq.push(t); // -Ts*S
    }
    if let Some(t) = term_at(layout, 1, row, col, true, Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)) {
        eq.push(t); // -Ti
    }
    vec![eq]
}

/// `S(Ux M + Us) - (Um M + Ui) = 0`, dual of the T-family, for the square U8/UE10/U16 types.
fn u_family_equation(layout: &Layout, row: usize, col: usize, m_value: Complex64, s_value: Complex64) -> Vec<Equation> {
    let mut eq = Equation::default();
    // families: 0=Um, 1=Ui, 2=Ux, 3=Us
    if let Some(t) = term_at(layout, 2, row, col, false, m_value, s_value) {
        eq.push(t); // +S*Ux*M
    }
    if let Some(t) = term_at(layout, 3, row, col, false, Complex64::new(1.0, 0.0), s_value) {
        eq.push(t); // +S*Us
    }
    if let Some(t) = term_at(layout, 0, row, col, true, m_value, Complex64::new(1.0, 0.0)) {
        eq.push(t); // -Um*M
    }
    if let Some(t) = term_at(layout, 1, row, col, true, Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)) {
        eq.push(t); // -Ui
    }
    vec![eq]
}

/// UE14/E12's per-column system: `s*(ux[r]*m + us[r]) - (um[r]*m + ui[r]) = 0` for each raw
/// receiver `r` (`row`) against the DUT port `system`'s S-value. E12's system has no `Ux`/`Us`
/// families (`families == 2`): they are implicitly `0`/`1`, matching the "fixed transmission
/// tracking, no source match term" classical 12-term model.
fn ue14_equation(layout: &Layout, system: usize, row: usize, m_value: Complex64, s_value: Complex64) -> Vec<Equation> {
    let base = layout.system_offset(system);
    let stride = layout.block_dim; // one scalar per raw receiver, per family
    let um_idx = base + row;
    let ui_idx = base + stride + row;
    let mut eq = Equation::default();

    let is_unity_um = layout.unity_index_for_system(system) == Some(row);

    eq.push(Term {
        x_index: if is_unity_um { None } else { Some(um_idx) },
        negative: true,
        m_value,
        s_value: Complex64::new(1.0, 0.0),
    }); // -um[r]*m
    eq.push(Term {
        x_index: Some(ui_idx),
        negative: true,
        m_value: Complex64::new(1.0, 0.0),
        s_value: Complex64::new(1.0, 0.0),
    }); // -ui[r]

    if layout.families == 4 {
        let ux_idx = base + 2 * stride + row;
        let us_idx = base + 3 * stride + row;
        eq.push(Term {
            x_index: Some(ux_idx),
            negative: false,
            m_value,
            s_value,
        }); // +s*ux[r]*m
        eq.push(Term {
            x_index: Some(us_idx),
            negative: false,
            m_value: Complex64::new(1.0, 0.0),
            s_value,
        }); // +s*us[r]
    } else {
        // E12: Us == 1 fixed, contributes `s` directly with no unknown.
        eq.push(Term {
            x_index: None,
            negative: false,
            m_value: Complex64::new(1.0, 0.0),
            s_value,
        });
    }
    vec![eq]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn t8_diagonal_cell_has_four_terms() {
        let layout = Layout::new(CalType::T8, 2, 2).unwrap();
        let eqs = build_cell_equations(&layout, 0, 0, 0, c(0.3, -0.1), c(1.0, 0.0));
        assert_eq!(eqs.len(), 1);
        assert_eq!(eqs[0].terms.len(), 4);
    }

    #[test]
    fn t8_off_diagonal_cell_has_no_terms() {
        let layout = Layout::new(CalType::T8, 2, 2).unwrap();
        let eqs = build_cell_equations(&layout, 0, 0, 1, c(0.3, -0.1), c(1.0, 0.0));
        assert_eq!(eqs[0].terms.len(), 0);
    }

    #[test]
    fn t16_dense_cell_has_four_terms_everywhere() {
        let layout = Layout::new(CalType::T16, 2, 2).unwrap();
        let eqs = build_cell_equations(&layout, 0, 0, 1, c(0.3, -0.1), c(1.0, 0.0));
        assert_eq!(eqs[0].terms.len(), 4);
    }

    #[test]
    fn ue14_unity_term_has_no_x_index() {
        let layout = Layout::new(CalType::UE14, 2, 2).unwrap();
        let eqs = build_cell_equations(&layout, 0, 0, 0, c(0.5, 0.0), c(1.0, 0.0));
        let unity_terms: Vec<_> = eqs[0].terms.iter().filter(|t| t.x_index.is_none()).collect();
        assert_eq!(unity_terms.len(), 1);
    }

    #[test]
    fn e12_has_two_families_plus_implicit_unity() {
        let layout = Layout::new(CalType::E12, 2, 1).unwrap();
        let eqs = build_cell_equations(&layout, 0, 0, 0, c(0.3, 0.0), c(0.8, 0.0));
        // um, ui unknowns + implicit unity s-term (x_index None) = 3 terms.
        assert_eq!(eqs[0].terms.len(), 3);
        assert_eq!(eqs[0].terms.iter().filter(|t| t.x_index.is_none()).count(), 1);
    }
}
