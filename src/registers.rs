//! Interval-compressed sets of Modbus register indices.
//!
//! A `RegisterSet` stores sorted, maximally merged closed intervals. Two
//! ranges merge when they overlap or when the gap between them is at most
//! one register, since a gap of one is still consecutive for burst reads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Signed on purpose: `end_of_run` reports `r - 1` for absent registers.
pub type RegisterIndex = i32;

/// Closed interval `[begin, end]` of register indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRange {
    pub begin: RegisterIndex,
    pub end: RegisterIndex,
}

impl RegisterRange {
    pub fn new(begin: RegisterIndex, end: RegisterIndex) -> Self {
        Self { begin, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterSet {
    // Invariant: non-empty, non-overlapping, non-adjacent, strictly ascending.
    intervals: Vec<RegisterRange>,
}

impl RegisterSet {
    pub fn new(ranges: &[RegisterRange]) -> Self {
        if ranges.is_empty() {
            return Self::default();
        }

        // Sort by `begin`; equal begins keep the larger `end`.
        let mut ends_by_begin: BTreeMap<RegisterIndex, RegisterIndex> = BTreeMap::new();
        for range in ranges {
            let end = ends_by_begin.entry(range.begin).or_insert(range.end);
            if *end < range.end {
                *end = range.end;
            }
        }

        let mut intervals = Vec::new();
        let mut iter = ends_by_begin.into_iter();
        let (mut next_begin, mut next_end) = iter.next().unwrap();
        for (begin, end) in iter {
            if begin <= next_end + 1 {
                if end > next_end {
                    next_end = end;
                }
            } else {
                intervals.push(RegisterRange::new(next_begin, next_end));
                next_begin = begin;
                next_end = end;
            }
        }
        intervals.push(RegisterRange::new(next_begin, next_end));

        Self { intervals }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[RegisterRange] {
        &self.intervals
    }

    pub fn contains(&self, register: RegisterIndex) -> bool {
        self.find_interval(register).is_some()
    }

    /// Ascending enumeration of every individual register index.
    pub fn iter(&self) -> impl Iterator<Item = RegisterIndex> + '_ {
        self.intervals
            .iter()
            .flat_map(|range| range.begin..=range.end)
    }

    /// The maximal `r2` such that all of `register..=r2` are members.
    /// Returns `register - 1` if `register` itself is absent.
    pub fn end_of_run(&self, register: RegisterIndex) -> RegisterIndex {
        match self.find_interval(register) {
            Some(index) => self.intervals[index].end,
            None => register - 1,
        }
    }

    /// True iff every interval of `self` lies inside some interval of `other`.
    pub fn is_subset_of(&self, other: &RegisterSet) -> bool {
        let mut candidates = other.intervals.iter();
        let mut current = candidates.next();
        for interval in &self.intervals {
            while let Some(candidate) = current {
                if candidate.end >= interval.end {
                    break;
                }
                current = candidates.next();
            }
            // `current` is now the first interval of `other` (if any) whose
            // end reaches past ours; only it can contain us.
            match current {
                Some(candidate) if candidate.begin <= interval.begin => {}
                _ => return false,
            }
        }
        true
    }

    pub fn union(&self, other: &RegisterSet) -> RegisterSet {
        let mut ranges = self.intervals.clone();
        ranges.extend_from_slice(&other.intervals);
        RegisterSet::new(&ranges)
    }

    fn find_interval(&self, register: RegisterIndex) -> Option<usize> {
        let mut lower = 0;
        let mut upper = self.intervals.len();
        while lower < upper {
            let middle = lower + (upper - lower) / 2;
            let interval = &self.intervals[middle];
            if register < interval.begin {
                upper = middle;
            } else if register <= interval.end {
                return Some(middle);
            } else {
                lower = middle + 1;
            }
        }
        None
    }
}

impl From<&[RegisterRange]> for RegisterSet {
    fn from(ranges: &[RegisterRange]) -> Self {
        Self::new(ranges)
    }
}
