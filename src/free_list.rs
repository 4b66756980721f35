//! Free/used tracking over a numeric span.
//!
//! The free space is kept as a set of disjoint, non-adjacent inclusive
//! intervals indexed by their low end. The number of intervals grows with
//! the number of allocation holes, not with the size of the span, so a /64
//! costs the same as a /120.
//!
//! Every point operation is `O(log n)` in the number of free intervals; the
//! free count is maintained incrementally.

use std::collections::BTreeMap;

use primitive_types::U256;

use crate::error::{Error, Result};

/// Tracks which values of `[low, high]` are free.
#[derive(Debug, Clone)]
pub struct FreeList {
    low: u128,
    high: u128,
    /// Free intervals: interval start → interval end (inclusive).
    intervals: BTreeMap<u128, u128>,
    free: U256,
}

fn interval_len(start: u128, end: u128) -> U256 {
    U256::from(end - start) + U256::one()
}

impl FreeList {
    /// Creates a free list where every value of `[low, high]` is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `low > high`.
    pub fn new(low: u128, high: u128) -> Result<Self> {
        if low > high {
            return Err(Error::InvalidRange(format!(
                "free list bounds {:#x} > {:#x}",
                low, high
            )));
        }
        let mut intervals = BTreeMap::new();
        intervals.insert(low, high);
        Ok(Self {
            low,
            high,
            intervals,
            free: interval_len(low, high),
        })
    }

    pub fn low(&self) -> u128 {
        self.low
    }

    pub fn high(&self) -> u128 {
        self.high
    }

    /// Total number of values tracked, free or used.
    pub fn capacity(&self) -> U256 {
        interval_len(self.low, self.high)
    }

    /// Number of free values.
    pub fn free_count(&self) -> U256 {
        self.free
    }

    /// Number of disjoint free intervals.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.intervals.is_empty()
    }

    fn check_span(&self, value: u128) -> Result<()> {
        if value < self.low || value > self.high {
            return Err(Error::OutOfSpan(value));
        }
        Ok(())
    }

    /// Returns the free interval containing `value`, if any.
    fn interval_containing(&self, value: u128) -> Option<(u128, u128)> {
        self.intervals
            .range(..=value)
            .next_back()
            .filter(|(_, end)| **end >= value)
            .map(|(start, end)| (*start, *end))
    }

    pub fn is_free(&self, value: u128) -> bool {
        self.interval_containing(value).is_some()
    }

    /// Takes the lowest free value.
    ///
    /// Returns `None` when the span is exhausted.
    pub fn next_free(&mut self) -> Option<u128> {
        let (start, end) = self.intervals.pop_first()?;
        if start < end {
            self.intervals.insert(start + 1, end);
        }
        self.free = self.free - U256::one();
        Some(start)
    }

    /// Marks `value` as used.
    ///
    /// Returns `Ok(false)` if it was already used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfSpan`] if `value` lies outside `[low, high]`.
    pub fn mark_used(&mut self, value: u128) -> Result<bool> {
        self.check_span(value)?;

        let Some((start, end)) = self.interval_containing(value) else {
            return Ok(false);
        };

        self.intervals.remove(&start);
        if start < value {
            self.intervals.insert(start, value - 1);
        }
        if value < end {
            self.intervals.insert(value + 1, end);
        }
        self.free = self.free - U256::one();
        Ok(true)
    }

    /// Marks `value` as free, coalescing it with adjacent free intervals.
    ///
    /// Returns `Ok(false)` if it was already free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfSpan`] if `value` lies outside `[low, high]`.
    pub fn mark_free(&mut self, value: u128) -> Result<bool> {
        self.check_span(value)?;

        if self.is_free(value) {
            return Ok(false);
        }

        let mut start = value;
        let mut end = value;

        // An interval ending right below `value` is the last one starting
        // before it, since `value` itself is not free.
        if let Some(below) = value.checked_sub(1)
            && let Some((&left_start, &left_end)) = self.intervals.range(..value).next_back()
            && left_end == below
        {
            self.intervals.remove(&left_start);
            start = left_start;
        }

        if let Some(above) = value.checked_add(1)
            && let Some(right_end) = self.intervals.remove(&above)
        {
            end = right_end;
        }

        self.intervals.insert(start, end);
        self.free = self.free + U256::one();
        Ok(true)
    }

    /// Changes the span to `[low, high]`.
    ///
    /// Free intervals are clipped to the new span and any newly covered
    /// space is added as free. Used values outside the new span are
    /// forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `low > high`; the list is unchanged.
    pub fn resize(&mut self, low: u128, high: u128) -> Result<()> {
        if low > high {
            return Err(Error::InvalidRange(format!(
                "free list bounds {:#x} > {:#x}",
                low, high
            )));
        }

        let mut pieces: Vec<(u128, u128)> = self
            .intervals
            .iter()
            .filter(|(start, end)| **end >= low && **start <= high)
            .map(|(start, end)| ((*start).max(low), (*end).min(high)))
            .collect();

        if low < self.low {
            pieces.push((low, (self.low - 1).min(high)));
        }
        if high > self.high {
            pieces.push(((self.high + 1).max(low), high));
        }
        pieces.sort_unstable();

        let mut intervals: BTreeMap<u128, u128> = BTreeMap::new();
        let mut current: Option<(u128, u128)> = None;
        for (start, end) in pieces {
            current = match current {
                Some((cur_start, cur_end)) if cur_end.checked_add(1).is_none_or(|n| n >= start) => {
                    Some((cur_start, cur_end.max(end)))
                }
                Some(done) => {
                    intervals.insert(done.0, done.1);
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((start, end)) = current {
            intervals.insert(start, end);
        }

        self.free = intervals
            .iter()
            .fold(U256::zero(), |sum, (start, end)| sum + interval_len(*start, *end));
        self.intervals = intervals;
        self.low = low;
        self.high = high;
        Ok(())
    }

    /// Iterates the free intervals in ascending order.
    pub fn intervals(&self) -> impl Iterator<Item = (u128, u128)> + '_ {
        self.intervals.iter().map(|(start, end)| (*start, *end))
    }
}
