//! Integer alignment of template channels to a reference channel.

/// Signed shift `s` in `[-jitter, jitter]` maximising `Σ_t reference[t] · signal[t + s]`.
///
/// Samples outside `signal` count as zero. Ties keep the shift with the smallest
/// magnitude, preferring negative shifts at equal magnitude.
pub fn best_shift(reference: &[f32], signal: &[f32], jitter: usize) -> i32 {
    let mut best_shift = 0i32;
    let mut best_score = shifted_dot(reference, signal, 0);

    for magnitude in 1..=jitter as i32 {
        for shift in [-magnitude, magnitude] {
            let score = shifted_dot(reference, signal, shift);
            if score > best_score {
                best_score = score;
                best_shift = shift;
            }
        }
    }
    best_shift
}

fn shifted_dot(reference: &[f32], signal: &[f32], shift: i32) -> f64 {
    let n = signal.len() as i64;
    reference
        .iter()
        .enumerate()
        .filter_map(|(t, &r)| {
            let idx = t as i64 + shift as i64;
            (0..n)
                .contains(&idx)
                .then(|| r as f64 * signal[idx as usize] as f64)
        })
        .sum()
}

/// Zero-pad `raw` by `pad` samples on each side and shift it: `out[x] = raw[x - pad + shift]`.
pub fn pad_and_shift(raw: &[f32], pad: usize, shift: i32, out: &mut [f32]) {
    debug_assert_eq!(out.len(), raw.len() + 2 * pad);
    for (x, value) in out.iter_mut().enumerate() {
        let src = x as i64 - pad as i64 + shift as i64;
        *value = if (0..raw.len() as i64).contains(&src) {
            raw[src as usize]
        } else {
            0.0
        };
    }
}
