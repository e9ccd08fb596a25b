//! Closed-form sub-sample peak refinement.

/// Vertex of the parabola through `(−1, left)`, `(0, center)`, `(1, right)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticPeak {
    /// Offset of the maximum relative to the center sample.
    pub shift: f32,
    /// Parabola value at `shift`.
    pub value: f32,
}

/// Fit a parabola through three equidistant samples and locate its maximum.
///
/// Non-concave or non-finite configurations give a zero shift. The shift is
/// clamped to `[−max_shift, max_shift]`.
pub fn fit_vertex(left: f32, center: f32, right: f32, max_shift: f32) -> QuadraticPeak {
    let a = 0.5 * (left + right) - center;
    let b = 0.5 * (right - left);
    if !(a.is_finite() && b.is_finite()) {
        return QuadraticPeak {
            shift: 0.0,
            value: center,
        };
    }

    let shift = if a < 0.0 {
        (-b / (2.0 * a)).clamp(-max_shift, max_shift)
    } else {
        0.0
    };

    QuadraticPeak {
        shift,
        value: a * shift * shift + b * shift + center,
    }
}
