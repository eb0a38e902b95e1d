//! Partition oracle.
//!
//! Enumerates the sets of distinct digits 1..=9 of a given size summing to
//! a given target. Results are memoized process-wide; the table is
//! monotonic (entries are only ever inserted) and shared through `Arc`, so
//! concurrent readers across puzzles are safe even though each puzzle runs
//! single-threaded.

use crate::DigitSet;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// All partitions for one `(sum, length)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    /// Each partition as an ascending digit tuple.
    pub sets: Vec<Vec<u8>>,
    /// Union of all digits appearing in any partition.
    pub mask: DigitSet,
}

impl PartitionTable {
    fn empty() -> Self {
        Self {
            sets: Vec::new(),
            mask: DigitSet::empty(),
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.sets.len()
    }
}

static CACHE: LazyLock<Mutex<HashMap<(u32, usize), Arc<PartitionTable>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static EMPTY: LazyLock<Arc<PartitionTable>> = LazyLock::new(|| Arc::new(PartitionTable::empty()));

/// All size-`length` subsets of 1..=9 summing to `sum`. Out-of-range
/// inputs yield the empty table.
pub fn partitions(sum: u32, length: usize) -> Arc<PartitionTable> {
    if !(1..=9).contains(&length) || !(1..=45).contains(&sum) {
        return EMPTY.clone();
    }
    let mut cache = CACHE.lock().unwrap();
    if let Some(entry) = cache.get(&(sum, length)) {
        return entry.clone();
    }
    let entry = Arc::new(enumerate(sum, length));
    cache.insert((sum, length), entry.clone());
    entry
}

/// The 10-bit mask of digits appearing in any partition of `(sum, length)`.
pub fn partition_mask(sum: u32, length: usize) -> DigitSet {
    partitions(sum, length).mask
}

/// Number of valid partitions for `(sum, length)`.
pub fn partition_count(sum: u32, length: usize) -> usize {
    partitions(sum, length).count()
}

fn enumerate(sum: u32, length: usize) -> PartitionTable {
    let mut table = PartitionTable::empty();
    let mut current = Vec::with_capacity(length);
    recurse(sum, length, 1, &mut current, &mut table);
    table
}

fn recurse(
    remaining: u32,
    slots: usize,
    min_digit: u8,
    current: &mut Vec<u8>,
    table: &mut PartitionTable,
) {
    if slots == 0 {
        if remaining == 0 {
            for &d in current.iter() {
                table.mask.insert(d);
            }
            table.sets.push(current.clone());
        }
        return;
    }
    for d in min_digit..=9 {
        if d as u32 > remaining {
            break;
        }
        current.push(d);
        recurse(remaining - d as u32, slots - 1, d + 1, current, table);
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_partitions() {
        assert_eq!(partitions(3, 2).sets, vec![vec![1, 2]]);
        assert_eq!(partitions(17, 2).sets, vec![vec![8, 9]]);
        assert_eq!(partitions(4, 2).sets, vec![vec![1, 3]]);
        assert_eq!(partitions(45, 9).sets.len(), 1);
        assert_eq!(partition_mask(45, 9), DigitSet::all());
    }

    #[test]
    fn test_partition_counts() {
        // 9 over 2 cells: {1,8},{2,7},{3,6},{4,5}
        assert_eq!(partition_count(9, 2), 4);
        // 6 over 3 cells: only {1,2,3}
        assert_eq!(partition_count(6, 3), 1);
        assert_eq!(partition_mask(6, 3).iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_out_of_range_is_empty() {
        assert_eq!(partition_count(0, 2), 0);
        assert_eq!(partition_count(46, 2), 0);
        assert_eq!(partition_count(10, 0), 0);
        assert_eq!(partition_count(10, 10), 0);
        // Infeasible but in-range inputs are also empty.
        assert_eq!(partition_count(3, 3), 0);
        assert_eq!(partition_count(45, 2), 0);
    }

    #[test]
    fn test_determinism_and_sharing() {
        let a = partitions(23, 4);
        let b = partitions(23, 4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.sets, b.sets);
        // Tuples are ascending.
        for set in &a.sets {
            assert!(set.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_mask_matches_sets() {
        let table = partitions(12, 3);
        let mut union = DigitSet::empty();
        for set in &table.sets {
            for &d in set {
                union.insert(d);
            }
        }
        assert_eq!(union, table.mask);
    }
}
