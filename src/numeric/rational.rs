//! Rational-function interpolation with a restartable segment hint (§4.A), used to evaluate
//! `Vector`/`CalkitData` parameters and to interpolate solved error terms at an arbitrary
//! frequency in `apply` (§4.H).
//!
//! The algorithm is the classic Bulirsch–Stoer diagonal rational interpolant (as in `ratint`
//! from Numerical Recipes), applied to a small window of samples around the query point. The
//! window is located starting from a caller-supplied hint index so that a caller stepping
//! through frequencies in order pays roughly O(1) per lookup instead of a fresh binary search.

use num_complex::Complex64;

/// Number of samples used in the local interpolation window. Matches a typical four-point
/// Bulirsch–Stoer window: enough to capture curvature without instability on sparse tables.
const WINDOW: usize = 4;

/// A restartable position hint for repeated, roughly-monotonic interpolation queries against
/// the same frequency table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentHint(pub usize);

/// Locates the index of the first sample `>= x`, starting the search from `hint` and updating
/// it in place. Falls back to a full binary search if the hint is far from the answer.
fn locate(freqs: &[f64], x: f64, hint: &mut SegmentHint) -> usize {
    let n = freqs.len();
    if n == 0 {
        return 0;
    }
    let mut lo = 0usize;
    let mut hi = n;
    // Galloping search from the hint: cheap when queries are monotonic, correct regardless.
    let start = hint.0.min(n.saturating_sub(1));
    if freqs[start] <= x {
        lo = start;
        let mut step = 1usize;
        while lo + step < n && freqs[lo + step] <= x {
            lo += step;
            step *= 2;
        }
        hi = (lo + step + 1).min(n);
    } else {
        hi = start + 1;
        let mut step = 1usize;
        while lo + step < hi && freqs[hi - step - 1] > x {
            hi -= step;
            step *= 2;
        }
        lo = hi.saturating_sub(step + 1);
    }
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if freqs[mid] <= x {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    hint.0 = lo.min(n.saturating_sub(1));
    lo
}

/// Evaluates the rational-function interpolant of `(freqs[i], values[i])` at `x`, using a
/// window of up to [`WINDOW`] samples nearest `x` located via `hint`. `freqs` must be sorted
/// ascending and the same length as `values`.
///
/// For `freqs.len() == 1` this degenerates to returning the sole sample (a flat "interpolant").
pub fn interp(freqs: &[f64], values: &[Complex64], x: f64, hint: &mut SegmentHint) -> Complex64 {
    assert_eq!(freqs.len(), values.len());
    let n = freqs.len();
    if n == 0 {
        return Complex64::new(0.0, 0.0);
    }
    if n == 1 {
        return values[0];
    }
    let idx = locate(freqs, x, hint);
    let half = WINDOW / 2;
    let start = idx.saturating_sub(half).min(n.saturating_sub(WINDOW.min(n)));
    let end = (start + WINDOW.min(n)).min(n);
    let start = end.saturating_sub(WINDOW.min(n));

    ratint(&freqs[start..end], &values[start..end], x)
}

/// Bulirsch–Stoer diagonal rational interpolation (complex-valued) through `(xs[i], ys[i])`.
fn ratint(xs: &[f64], ys: &[Complex64], x: f64) -> Complex64 {
    let n = xs.len();
    if n == 1 {
        return ys[0];
    }
    for (i, &xi) in xs.iter().enumerate() {
        if xi == x {
            return ys[i];
        }
    }
    const TINY: f64 = 1.0e-30;
    let mut c = ys.to_vec();
    let mut d = ys.to_vec();
    // Find the index of the closest sample to seed the recursion, as in Numerical Recipes.
    let mut ns = 0usize;
    let mut best = (xs[0] - x).abs();
    for (i, &xi) in xs.iter().enumerate() {
        let dist = (xi - x).abs();
        if dist < best {
            best = dist;
            ns = i;
        }
    }
    let mut y = ys[ns];
    if ns > 0 {
        ns -= 1;
    }
    for m in 1..n {
        for i in 0..(n - m) {
            let w = c[i + 1] - d[i];
            let h = xs[i + m] - x;
            let t = (xs[i] - x) * d[i] / h;
            let denom = t - c[i + 1];
            let denom = if denom.norm() < TINY {
                Complex64::new(TINY, 0.0)
            } else {
                denom
            };
            let dd = w / denom;
            d[i] = c[i + 1] * dd;
            c[i] = t * dd;
        }
        let dy = if 2 * ns < n - m {
            c[ns + 1]
        } else {
            let dy = d[ns];
            if ns > 0 {
                ns -= 1;
            }
            dy
        };
        y += dy;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_on_grid_points() {
        let freqs = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let values: Vec<Complex64> = freqs.iter().map(|f| Complex64::new(*f * 2.0 + 1.0, -*f)).collect();
        let mut hint = SegmentHint::default();
        for (i, &f) in freqs.iter().enumerate() {
            let got = interp(&freqs, &values, f, &mut hint);
            assert!((got - values[i]).norm() < 1e-8, "f={} got={} want={}", f, got, values[i]);
        }
    }

    #[test]
    fn single_sample_is_flat() {
        let freqs = vec![5.0];
        let values = vec![Complex64::new(1.0, 2.0)];
        let mut hint = SegmentHint::default();
        assert_eq!(interp(&freqs, &values, 100.0, &mut hint), values[0]);
    }

    #[test]
    fn interpolates_between_samples() {
        let freqs = vec![1.0, 2.0, 3.0, 4.0];
        let values: Vec<Complex64> = freqs.iter().map(|f| Complex64::new(*f, 0.0)).collect();
        let mut hint = SegmentHint::default();
        let got = interp(&freqs, &values, 2.5, &mut hint);
        assert!((got.re - 2.5).abs() < 1e-6);
    }
}
