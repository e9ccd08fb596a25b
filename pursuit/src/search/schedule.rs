//! Reinjection schedule.

use crate::config::Scd;

/// What a search iteration does before looking for peaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Normal,
    /// Reinject the detections recorded in `slot`, then search and overwrite the slot.
    Rescan { slot: usize },
}

/// Alternating normal and rescan halves of `iterations` each, for `stages` cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScdSchedule {
    iterations: usize,
    stages: usize,
}

impl ScdSchedule {
    pub fn new(iterations: usize, stages: usize) -> Self {
        assert!(iterations > 0, "scd iterations must be > 0");
        Self { iterations, stages }
    }

    pub fn from_config(scd: &Scd) -> Option<Self> {
        match *scd {
            Scd::Disabled => None,
            Scd::Enabled { iterations, stages } => Some(Self::new(iterations, stages)),
        }
    }

    /// Step for `iteration`, given the number of recorded ledger slots.
    ///
    /// A rescan whose slot was never recorded falls back to a normal iteration.
    pub fn step(&self, iteration: usize, recorded: usize) -> Step {
        let period = 2 * self.iterations;
        let phase = iteration % period;
        if iteration >= self.stages * period || phase < self.iterations {
            return Step::Normal;
        }
        let slot = phase - self.iterations;
        if slot < recorded {
            Step::Rescan { slot }
        } else {
            Step::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternating_halves() {
        let schedule = ScdSchedule::new(3, 2);
        let steps: Vec<Step> = (0..14).map(|k| schedule.step(k, 100)).collect();
        assert_eq!(steps[0], Step::Normal);
        assert_eq!(steps[2], Step::Normal);
        assert_eq!(steps[3], Step::Rescan { slot: 0 });
        assert_eq!(steps[5], Step::Rescan { slot: 2 });
        assert_eq!(steps[6], Step::Normal);
        assert_eq!(steps[10], Step::Rescan { slot: 1 });
        // Past the last stage everything is normal.
        assert_eq!(steps[12], Step::Normal);
        assert_eq!(steps[13], Step::Normal);
    }

    #[test]
    fn test_missing_slot_is_normal() {
        let schedule = ScdSchedule::new(2, 1);
        assert_eq!(schedule.step(2, 1), Step::Rescan { slot: 0 });
        assert_eq!(schedule.step(3, 1), Step::Normal);
    }

    #[test]
    fn test_disabled_config() {
        assert!(ScdSchedule::from_config(&Scd::Disabled).is_none());
        let schedule = ScdSchedule::from_config(&Scd::Enabled {
            iterations: 4,
            stages: 1,
        })
        .unwrap();
        assert_eq!(schedule.step(4, 4), Step::Rescan { slot: 0 });
    }
}
