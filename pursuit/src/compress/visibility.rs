//! Channel visibility and the unit-unit overlap graph.

use crate::common::Array2;

/// Per-unit visible channels (`units × channels`).
///
/// A channel is visible when its peak-to-peak amplitude reaches `strong`, or when
/// it reaches `weak` and at least one spatial neighbour is strong.
pub fn visibility(
    ptp: &Array2<f32>,
    neighbors: &[Vec<usize>],
    weak: f32,
    strong: f32,
) -> Array2<bool> {
    let (n_units, n_channels) = ptp.shape();
    assert_eq!(
        neighbors.len(),
        n_channels,
        "Neighbor list must cover every channel"
    );

    let mut visible = Array2::new_default(n_units, n_channels);
    for u in 0..n_units {
        let amplitudes = ptp.row(u);
        let row = visible.row_mut(u);
        for c in 0..n_channels {
            let is_strong = amplitudes[c] >= strong;
            let propagated = amplitudes[c] >= weak
                && neighbors[c].iter().any(|&nb| amplitudes[nb] >= strong);
            row[c] = is_strong || propagated;
        }
    }
    visible
}

/// Symmetric overlap graph: an edge between two units sharing a visible channel.
///
/// The diagonal is always set, including for units without visible channels.
pub fn overlap_graph(visibility: &Array2<bool>) -> Array2<bool> {
    let n_units = visibility.rows();
    let mut overlap = Array2::new_default(n_units, n_units);
    for i in 0..n_units {
        overlap[(i, i)] = true;
        for j in (i + 1)..n_units {
            let shared = visibility
                .row(i)
                .iter()
                .zip(visibility.row(j))
                .any(|(&a, &b)| a && b);
            overlap[(i, j)] = shared;
            overlap[(j, i)] = shared;
        }
    }
    overlap
}
