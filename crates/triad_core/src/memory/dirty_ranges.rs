//! # Dirty Range Tracking
//!
//! Records which byte ranges of a shadow buffer differ from the GPU copy.
//!
//! Ranges are kept disjoint and coalesced: marking a range that touches or
//! overlaps existing ranges merges them into one. Lookups and inserts are
//! `O(log n)` in the number of disjoint ranges (plus the ranges swallowed by
//! a merge), because attribute writes are frequent and fine-grained.

use std::collections::BTreeMap;
use std::ops::Range;

/// Disjoint, coalesced set of dirty byte ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRanges {
    /// begin -> end
    ranges: BTreeMap<usize, usize>,
}

impl DirtyRanges {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `[begin, end)` dirty, merging with touching or overlapping ranges.
    pub fn insert(&mut self, begin: usize, end: usize) {
        if begin >= end {
            return;
        }
        let mut begin = begin;
        let mut end = end;

        if let Some((&prev_begin, &prev_end)) = self.ranges.range(..=begin).next_back() {
            if prev_end >= begin {
                if prev_end >= end {
                    return;
                }
                self.ranges.remove(&prev_begin);
                begin = prev_begin;
            }
        }

        while let Some((&next_begin, &next_end)) = self.ranges.range(begin..=end).next() {
            self.ranges.remove(&next_begin);
            end = end.max(next_end);
        }

        self.ranges.insert(begin, end);
    }

    /// Replaces the set with the single range `[0, len)`.
    pub fn mark_all(&mut self, len: usize) {
        self.ranges.clear();
        self.insert(0, len);
    }

    /// Drops everything at or beyond `limit`, shortening a straddling range.
    pub fn clip(&mut self, limit: usize) {
        let beyond: Vec<usize> = self.ranges.range(limit..).map(|(&b, _)| b).collect();
        for begin in beyond {
            self.ranges.remove(&begin);
        }
        if let Some(end) = self.ranges.values_mut().next_back() {
            *end = (*end).min(limit);
        }
    }

    /// Removes every range.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Returns true if nothing is dirty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Total dirty bytes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.ranges.iter().map(|(b, e)| e - b).sum()
    }

    /// Iterates the ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.ranges.iter().map(|(&b, &e)| b..e)
    }
}
