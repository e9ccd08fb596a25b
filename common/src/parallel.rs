//! Concurrency-limited parallel iteration utilities.
//!
//! Wraps rayon to process work items in parallel while limiting how many are
//! in flight at once. Used where every item allocates a sizeable scratch buffer
//! (per-unit projections, per-pair correlations) and memory must stay bounded.

use rayon::prelude::*;

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// Output order matches input order.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Vec<R> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results);
    }
    results
}

/// Like [`par_map_limited`] over the index range `0..len`.
pub fn par_map_range_limited<R, F>(len: usize, max_concurrent: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(len);
    let mut start = 0;
    while start < len {
        let end = (start + max_concurrent).min(len);
        let chunk_results: Vec<R> = (start..end).into_par_iter().map(&f).collect();
        results.extend(chunk_results);
        start = end;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_par_map_limited_preserves_order() {
        let items: Vec<i32> = (0..100).collect();
        let result = par_map_limited(&items, 4, |&x| x * 2);
        let expected: Vec<i32> = (0..100).map(|x| x * 2).collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_par_map_limited_empty() {
        let items: Vec<i32> = vec![];
        let result = par_map_limited(&items, 3, |&x| x);
        assert!(result.is_empty());
    }

    #[test]
    #[should_panic(expected = "max_concurrent must be > 0")]
    fn test_par_map_limited_zero_panics() {
        par_map_limited(&[1, 2, 3], 0, |&x| x);
    }

    #[test]
    fn test_par_map_range_limited_matches_serial() {
        let result = par_map_range_limited(17, 5, |i| i * i);
        let expected: Vec<usize> = (0..17).map(|i| i * i).collect();
        assert_eq!(result, expected);
        assert!(par_map_range_limited(0, 5, |i| i).is_empty());
    }

    #[test]
    fn test_par_map_range_limited_concurrency_cap() {
        let in_flight = AtomicUsize::new(0);
        let max_observed = AtomicUsize::new(0);

        par_map_range_limited(20, 3, |i| {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            i
        });

        let max = max_observed.load(Ordering::SeqCst);
        assert!(max <= 3, "max in-flight was {max}, expected <= 3");
    }
}
