//! Bounded per-iteration record of accepted spikes.

use super::Detection;
use crate::error::{Error, Result};

/// Append-only list of per-iteration detections, one slot per normal iteration.
///
/// Rescans overwrite an existing slot instead of appending, so the number of slots
/// never exceeds the number of normal iterations.
#[derive(Debug, Clone, Default)]
pub struct SpikeLedger {
    capacity: usize,
    slots: Vec<Vec<Detection>>,
}

impl SpikeLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record the detections of a new iteration and return its slot.
    pub fn push(&mut self, detections: Vec<Detection>) -> Result<usize> {
        if self.slots.len() >= self.capacity {
            return Err(Error::LedgerFull {
                capacity: self.capacity,
            });
        }
        self.slots.push(detections);
        Ok(self.slots.len() - 1)
    }

    /// Overwrite `slot`, returning its previous detections. `None` if the slot does not exist.
    pub fn replace(&mut self, slot: usize, detections: Vec<Detection>) -> Option<Vec<Detection>> {
        self.slots
            .get_mut(slot)
            .map(|existing| std::mem::replace(existing, detections))
    }

    pub fn slot(&self, slot: usize) -> Option<&[Detection]> {
        self.slots.get(slot).map(Vec::as_slice)
    }

    /// Total detections across all slots.
    pub fn n_detections(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// All detections ordered by objective index, then unit.
    pub fn into_detections(self) -> Vec<Detection> {
        let mut all: Vec<Detection> = self.slots.into_iter().flatten().collect();
        all.sort_by(|a, b| a.index.cmp(&b.index).then(a.unit.cmp(&b.unit)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(index: usize, unit: usize) -> Detection {
        Detection {
            index,
            unit,
            shift: 0.0,
            amplitude: 1.0,
        }
    }

    #[test]
    fn test_push_is_bounded() {
        let mut ledger = SpikeLedger::new(2);
        assert_eq!(ledger.push(vec![det(10, 0)]).unwrap(), 0);
        assert_eq!(ledger.push(vec![]).unwrap(), 1);
        assert!(matches!(
            ledger.push(vec![det(5, 1)]),
            Err(Error::LedgerFull { capacity: 2 })
        ));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_replace_does_not_append() {
        let mut ledger = SpikeLedger::new(4);
        ledger.push(vec![det(10, 0), det(50, 1)]).unwrap();
        ledger.push(vec![det(30, 2)]).unwrap();

        let previous = ledger.replace(0, vec![det(12, 3)]).unwrap();
        assert_eq!(previous, vec![det(10, 0), det(50, 1)]);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.slot(0), Some(&[det(12, 3)][..]));
        assert!(ledger.replace(5, vec![]).is_none());
    }

    #[test]
    fn test_into_detections_sorted() {
        let mut ledger = SpikeLedger::new(3);
        ledger.push(vec![det(40, 1), det(10, 0)]).unwrap();
        ledger.push(vec![det(25, 2)]).unwrap();
        assert_eq!(ledger.n_detections(), 3);

        let all = ledger.into_detections();
        let order: Vec<usize> = all.iter().map(|d| d.index).collect();
        assert_eq!(order, vec![10, 25, 40]);
    }
}
