//! Uniform cubic B-spline interpolation of kernel curves.
//!
//! Knots sit at integer sample positions. A curve of `len` samples is stored as
//! `len + 2` coefficients covering samples `-1..=len`, so evaluation inside
//! `[0, len - 1]` never needs boundary handling. Coefficients are fitted on a
//! symmetrically extended curve, which keeps the end samples free of boundary
//! artifacts, and only the interior region is kept.

use rayon::prelude::*;

use crate::common::Array2;

/// Cubic B-spline basis function.
#[inline]
pub fn b3(t: f32) -> f32 {
    let t = t.abs();
    if t < 1.0 {
        2.0 / 3.0 - t * t + 0.5 * t * t * t
    } else if t < 2.0 {
        let u = 2.0 - t;
        u * u * u / 6.0
    } else {
        0.0
    }
}

/// Symmetric ("half-sample") reflection of `index` into `0..len`.
#[inline]
fn reflect(index: i64, len: usize) -> usize {
    let len = len as i64;
    let r = index.rem_euclid(2 * len);
    (if r >= len { 2 * len - 1 - r } else { r }) as usize
}

/// Interpolating coefficients for `curve` (`curve.len() + 2` values).
///
/// `prepad` and `postpad` must both be at least 1.
pub fn fit_coefficients(curve: &[f32], prepad: usize, postpad: usize) -> Vec<f32> {
    assert!(
        prepad >= 1 && postpad >= 1,
        "spline padding must be >= 1 on each side"
    );
    let len = curve.len();
    if len == 0 {
        return vec![0.0; 2];
    }

    let extended: Vec<f64> = (0..prepad + len + postpad)
        .map(|i| curve[reflect(i as i64 - prepad as i64, len)] as f64)
        .collect();
    let coeffs = solve_interpolation(&extended);

    coeffs[prepad - 1..prepad + len + 1]
        .iter()
        .map(|&c| c as f32)
        .collect()
}

/// Solve `(c[i-1] + 4 c[i] + c[i+1]) / 6 = y[i]` with mirrored end coefficients
/// (`c[-1] = c[1]`, `c[n] = c[n-2]`) using the Thomas algorithm.
fn solve_interpolation(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n == 1 {
        return vec![y[0]];
    }

    let lower = |i: usize| if i == n - 1 { 2.0 } else { 1.0 };
    let upper = |i: usize| if i == 0 { 2.0 } else { 1.0 };

    // Forward sweep.
    let mut c_prime = vec![0.0f64; n];
    let mut d_prime = vec![0.0f64; n];
    c_prime[0] = upper(0) / 4.0;
    d_prime[0] = 6.0 * y[0] / 4.0;
    for i in 1..n {
        let denom = 4.0 - lower(i) * c_prime[i - 1];
        c_prime[i] = if i < n - 1 { upper(i) / denom } else { 0.0 };
        d_prime[i] = (6.0 * y[i] - lower(i) * d_prime[i - 1]) / denom;
    }

    // Back substitution.
    let mut c = vec![0.0f64; n];
    c[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        c[i] = d_prime[i] - c_prime[i] * c[i + 1];
    }
    c
}

/// Spline value at `x`. Zero outside `[0, len - 1]`.
pub fn eval(coeffs: &[f32], x: f32) -> f32 {
    ShiftedEval::new(-x).value(coeffs, 0)
}

/// Evaluates a spline at `k - shift` for integer `k`.
///
/// The fractional part is shared by every `k`, so the four basis weights are
/// computed once.
#[derive(Debug, Clone, Copy)]
pub struct ShiftedEval {
    /// `floor(-shift)`: knot index of sample `k` is `k + offset`.
    offset: i64,
    /// Fractional position inside the knot interval.
    frac: f32,
    weights: [f32; 4],
}

impl ShiftedEval {
    pub fn new(shift: f32) -> Self {
        let floor = (-shift).floor();
        let frac = -shift - floor;
        Self {
            offset: floor as i64,
            frac,
            weights: [b3(frac + 1.0), b3(frac), b3(frac - 1.0), b3(frac - 2.0)],
        }
    }

    /// `S(k - shift)` for the spline stored in `coeffs`.
    #[inline]
    pub fn value(&self, coeffs: &[f32], k: usize) -> f32 {
        let len = coeffs.len() as i64 - 2;
        let i = k as i64 + self.offset;
        if i < 0 || i > len - 1 || (i == len - 1 && self.frac > 0.0) {
            return 0.0;
        }
        // Stored index of sample `i + m` is `i + m + 1`, m in -1..=2.
        let mut sum = 0.0;
        for (m, &w) in self.weights.iter().enumerate() {
            let idx = (i + m as i64) as usize;
            if let Some(&c) = coeffs.get(idx) {
                sum += c * w;
            }
        }
        sum
    }
}

/// Spline coefficients for every kernel of a [`super::KernelBank`], in pair order.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineBank {
    /// `pairs × (len + 2)`.
    pub coeffs: Array2<f32>,
}

impl SplineBank {
    /// Fit every row of `kernels` (`pairs × len`).
    pub fn fit(kernels: &Array2<f32>, prepad: usize, postpad: usize) -> Self {
        let (n_pairs, len) = kernels.shape();
        let mut coeffs = Array2::new_default(n_pairs, len + 2);
        coeffs.par_rows_mut().for_each(|(pair, row)| {
            row.copy_from_slice(&fit_coefficients(kernels.row(pair), prepad, postpad));
        });
        Self { coeffs }
    }

    pub fn n_pairs(&self) -> usize {
        self.coeffs.rows()
    }

    /// Kernel length the splines were fitted on.
    pub fn len(&self) -> usize {
        self.coeffs.cols().saturating_sub(2)
    }

    pub fn is_empty(&self) -> bool {
        self.n_pairs() == 0
    }

    pub fn pair(&self, pair: usize) -> &[f32] {
        self.coeffs.row(pair)
    }
}
