//! Natural cubic spline fit/eval (§4.A), used solely to represent a `Correlated` parameter's
//! frequency-dependent standard deviation σ(f) from a user-supplied `(f, σ)` table.

use crate::error::VnaError;

/// A fitted natural cubic spline: second derivatives at each knot, precomputed once so repeated
/// evaluation is O(log n) per call.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    y2: Vec<f64>,
}

impl CubicSpline {
    /// Fits a natural (zero second-derivative at the endpoints) cubic spline through
    /// `(xs[i], ys[i])`. `xs` must be strictly ascending and have the same length as `ys`.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self, VnaError> {
        if xs.len() != ys.len() {
            return Err(VnaError::usage("cubic spline: xs and ys length mismatch"));
        }
        let n = xs.len();
        if n == 0 {
            return Err(VnaError::usage("cubic spline: empty table"));
        }
        for w in xs.windows(2) {
            if w[1] <= w[0] {
                return Err(VnaError::usage("cubic spline: xs must be strictly ascending"));
            }
        }
        let mut y2 = vec![0.0; n];
        if n >= 3 {
            let mut u = vec![0.0; n];
            for i in 1..n - 1 {
                let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
                let p = sig * y2[i - 1] + 2.0;
                y2[i] = (sig - 1.0) / p;
                let mut d = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
                    - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
                d = (6.0 * d / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
                u[i] = d;
            }
            for i in (0..n - 1).rev() {
                y2[i] = y2[i] * y2[i + 1] + u[i];
            }
        }
        Ok(CubicSpline {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            y2,
        })
    }

    /// Evaluates the spline at `x`. Outside `[xs[0], xs[last]]`, the endpoint segment's cubic is
    /// extrapolated (no explicit clamping, matching a plain cubic-spline library's behavior).
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if n == 1 {
            return self.ys[0];
        }
        let mut lo = 0usize;
        let mut hi = n - 1;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.xs[mid] > x {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let h = self.xs[hi] - self.xs[lo];
        let a = (self.xs[hi] - x) / h;
        let b = (x - self.xs[lo]) / h;
        a * self.ys[lo]
            + b * self.ys[hi]
            + ((a.powi(3) - a) * self.y2[lo] + (b.powi(3) - b) * self.y2[hi]) * (h * h) / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_on_knots() {
        let xs = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let ys = vec![0.0, 1.0, 4.0, 9.0, 16.0];
        let spline = CubicSpline::fit(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((spline.eval(*x) - y).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_non_ascending() {
        let xs = vec![0.0, 1.0, 0.5];
        let ys = vec![0.0, 1.0, 2.0];
        assert!(CubicSpline::fit(&xs, &ys).is_err());
    }

    #[test]
    fn two_point_is_linear() {
        let xs = vec![0.0, 10.0];
        let ys = vec![0.0, 20.0];
        let spline = CubicSpline::fit(&xs, &ys).unwrap();
        assert!((spline.eval(5.0) - 10.0).abs() < 1e-9);
    }
}
