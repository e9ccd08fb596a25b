//! Observed peak-to-peak amplitudes of detected spikes.
//!
//! For every accepted spike the signal is sampled on each visible channel at the
//! template's own trough and peak positions. Observations close enough to the
//! template's peak-to-peak amplitude are averaged per unit and channel, giving a
//! template-update step a measure of slow amplitude drift.

use crate::common::Array2;
use crate::search::SpikeTrain;
use crate::templates::TemplateSet;

/// Acceptance rule for one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftLimits {
    /// Accepted deviation as a fraction of the template ptp.
    pub max_percent: f32,
    /// Lower bound on the accepted deviation.
    pub min_diff: f32,
}

impl DriftLimits {
    #[inline]
    pub fn tolerance(&self, template_ptp: f32) -> f32 {
        (template_ptp * self.max_percent).max(self.min_diff)
    }
}

/// Per unit and channel average of accepted observations.
#[derive(Debug, Clone, PartialEq)]
pub struct PtpDrift {
    /// `units × channels`, zero where nothing was observed.
    pub average: Array2<f32>,
    /// `units × channels` accepted observation counts.
    pub counts: Array2<usize>,
}

impl PtpDrift {
    pub fn empty(n_units: usize, n_channels: usize) -> Self {
        Self {
            average: Array2::new_default(n_units, n_channels),
            counts: Array2::new_default(n_units, n_channels),
        }
    }

    /// Measure spikes detected in `data` (`channels × samples`).
    ///
    /// Spike times are columns of `data` where the raw template starts; spikes whose
    /// template would leave `data` are skipped.
    pub fn measure(
        templates: &TemplateSet,
        visibility: &Array2<bool>,
        data: &Array2<f32>,
        spikes: &SpikeTrain,
        limits: DriftLimits,
    ) -> Self {
        let n_units = templates.n_units();
        let n_channels = templates.n_channels();
        let n_time = templates.n_time() as i64;
        let extremes = template_extremes(templates);

        let mut sums = Array2::<f64>::new_default(n_units, n_channels);
        let mut counts = Array2::<usize>::new_default(n_units, n_channels);
        for spike in spikes.iter() {
            if spike.time < 0 || spike.time + n_time > data.cols() as i64 {
                continue;
            }
            let t0 = spike.time as usize;
            for c in (0..n_channels).filter(|&c| visibility[(spike.unit, c)]) {
                let (lo, hi, template_ptp) = extremes[spike.unit * n_channels + c];
                let observed = data[(c, t0 + hi)] - data[(c, t0 + lo)];
                if (observed - template_ptp).abs() < limits.tolerance(template_ptp) {
                    sums[(spike.unit, c)] += observed as f64;
                    counts[(spike.unit, c)] += 1;
                }
            }
        }

        let mut average = Array2::new_default(n_units, n_channels);
        for u in 0..n_units {
            for c in 0..n_channels {
                let n = counts[(u, c)];
                if n > 0 {
                    average[(u, c)] = (sums[(u, c)] / n as f64) as f32;
                }
            }
        }
        Self { average, counts }
    }

    /// Fold `other` into `self`, weighting averages by their counts.
    pub fn merge(&mut self, other: &PtpDrift) {
        assert_eq!(
            self.average.shape(),
            other.average.shape(),
            "drift shapes must match"
        );
        let (n_units, n_channels) = self.average.shape();
        for u in 0..n_units {
            for c in 0..n_channels {
                let (a, b) = (self.counts[(u, c)], other.counts[(u, c)]);
                if a + b == 0 {
                    continue;
                }
                let total = self.average[(u, c)] as f64 * a as f64
                    + other.average[(u, c)] as f64 * b as f64;
                self.average[(u, c)] = (total / (a + b) as f64) as f32;
                self.counts[(u, c)] = a + b;
            }
        }
    }

    pub fn total_observations(&self) -> usize {
        self.counts.as_slice().iter().sum()
    }
}

/// `(argmin, argmax, ptp)` per unit and channel, unit-major.
fn template_extremes(templates: &TemplateSet) -> Vec<(usize, usize, f32)> {
    let mut out = Vec::with_capacity(templates.n_units() * templates.n_channels());
    for u in 0..templates.n_units() {
        for c in 0..templates.n_channels() {
            let wave = templates.unit_channel(u, c);
            let mut lo = 0;
            let mut hi = 0;
            for (t, &v) in wave.iter().enumerate() {
                if v < wave[lo] {
                    lo = t;
                }
                if v > wave[hi] {
                    hi = t;
                }
            }
            out.push((lo, hi, wave[hi] - wave[lo]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Spike;
    use crate::testing::{inject, synthetic_templates};

    const LIMITS: DriftLimits = DriftLimits {
        max_percent: 0.2,
        min_diff: 1.5,
    };

    fn spike(time: i64, unit: usize) -> Spike {
        Spike {
            time,
            unit,
            shift: 0.0,
            amplitude: 1.0,
        }
    }

    #[test]
    fn test_tolerance() {
        assert_eq!(LIMITS.tolerance(100.0), 20.0);
        assert_eq!(LIMITS.tolerance(2.0), 1.5);
    }

    #[test]
    fn test_measures_scaled_spikes() {
        let templates = synthetic_templates(2, 4, 30);
        let visibility = Array2::new_filled(2, 4, true);
        let mut data = Array2::new_default(4, 400);
        inject(&mut data, &templates, 0, 50, 1.1);
        inject(&mut data, &templates, 0, 250, 0.9);

        let spikes = SpikeTrain::new(vec![spike(50, 0), spike(250, 0)]);
        let drift = PtpDrift::measure(&templates, &visibility, &data, &spikes, LIMITS);

        let template_ptp = templates.ptp();
        for c in 0..4 {
            assert_eq!(drift.counts[(0, c)], 2);
            assert!((drift.average[(0, c)] - template_ptp[(0, c)]).abs() < 1e-3);
            assert_eq!(drift.counts[(1, c)], 0);
        }
    }

    #[test]
    fn test_outliers_and_edge_spikes_skipped() {
        let templates = synthetic_templates(1, 2, 30);
        let visibility = Array2::new_filled(1, 2, true);
        let mut data = Array2::new_default(2, 200);
        inject(&mut data, &templates, 0, 20, 3.0);

        let spikes = SpikeTrain::new(vec![spike(20, 0), spike(190, 0), spike(-5, 0)]);
        let drift = PtpDrift::measure(&templates, &visibility, &data, &spikes, LIMITS);
        assert_eq!(drift.total_observations(), 0);
    }

    #[test]
    fn test_invisible_channels_skipped() {
        let templates = synthetic_templates(1, 3, 30);
        let mut visibility = Array2::new_filled(1, 3, true);
        visibility[(0, 2)] = false;
        let mut data = Array2::new_default(3, 100);
        inject(&mut data, &templates, 0, 10, 1.0);

        let drift = PtpDrift::measure(
            &templates,
            &visibility,
            &data,
            &SpikeTrain::new(vec![spike(10, 0)]),
            LIMITS,
        );
        assert_eq!(drift.counts[(0, 0)], 1);
        assert_eq!(drift.counts[(0, 2)], 0);
    }

    #[test]
    fn test_merge_weights_by_count() {
        let mut a = PtpDrift::empty(1, 1);
        a.average[(0, 0)] = 10.0;
        a.counts[(0, 0)] = 1;
        let mut b = PtpDrift::empty(1, 1);
        b.average[(0, 0)] = 20.0;
        b.counts[(0, 0)] = 3;

        a.merge(&b);
        assert_eq!(a.counts[(0, 0)], 4);
        assert!((a.average[(0, 0)] - 17.5).abs() < 1e-6);
    }
}
