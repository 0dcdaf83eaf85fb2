use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::debug;

use crate::codec::BucketCodec;
use crate::counter::Counter;
use crate::error::{non_negative, Error, Result};

/// A log-linear histogram over non-negative integer values.
///
/// Every cell is an atomic `Counter`, so all methods take `&self`. One
/// thread records while other threads read: a reader may observe a cell
/// before or after a concurrent increment, but never a torn count.
///
/// Values above the highest trackable value saturate into the last cell
/// and are included in `total_count()`.
///
/// `C` selects the width of the count cells; a cell that reaches its
/// maximum clamps there and sets the overflow flag.
pub struct Histogram<C = AtomicU64> {
    codec: BucketCodec,
    counts: Box<[C]>,
    total_count: AtomicU64,
    overflowed: AtomicBool,
}

/// A single count cell together with the range of values it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Lowest value counted in this cell, inclusive
    pub start: i64,
    /// Highest value counted in this cell, inclusive
    pub end: i64,
    /// Number of observations in the cell
    pub count: u64,
}

impl<C: Counter> Histogram<C> {
    pub fn new(highest_trackable_value: i64, significant_digits: u8) -> Result<Self> {
        Ok(Self::with_codec(BucketCodec::new(
            highest_trackable_value,
            significant_digits,
        )?))
    }

    /// Creates an empty histogram with an already validated layout.
    pub fn with_codec(codec: BucketCodec) -> Self {
        debug!(
            highest_trackable_value = codec.highest_trackable_value(),
            significant_digits = codec.significant_digits(),
            bucket_count = codec.bucket_count(),
            sub_bucket_count = codec.sub_bucket_count(),
            counts_len = codec.counts_len(),
            "allocating histogram"
        );
        let counts = (0..codec.counts_len()).map(|_| C::default()).collect();
        Self {
            codec,
            counts,
            total_count: AtomicU64::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    pub fn codec(&self) -> &BucketCodec {
        &self.codec
    }

    pub fn record(&self, value: i64) -> Result<()> {
        self.record_n(value, 1)
    }

    /// Records `count` occurrences of `value`.
    pub fn record_n(&self, value: i64, count: u64) -> Result<()> {
        let value = non_negative(value)?;
        self.record_count_at(value, count);
        Ok(())
    }

    /// Records `value`, then back-fills the samples a stalled sampler would
    /// have taken every `expected_interval`: `value - expected_interval`,
    /// `value - 2 * expected_interval`, ... for as long as they are still
    /// `>= expected_interval`. Nothing is back-filled if
    /// `expected_interval <= 0`.
    pub fn record_with_interval(&self, value: i64, expected_interval: i64) -> Result<()> {
        let value = non_negative(value)?;
        self.record_count_at(value, 1);
        if expected_interval <= 0 {
            return Ok(());
        }

        let interval = expected_interval as u64;
        let mut missing = value.saturating_sub(interval);
        while missing >= interval {
            self.record_count_at(missing, 1);
            missing -= interval;
        }
        Ok(())
    }

    fn record_count_at(&self, value: u64, count: u64) {
        let index = self.codec.index_of(value).min(self.counts.len() - 1);
        if self.counts[index].saturating_add(count) {
            self.overflowed.store(true, Ordering::Relaxed);
        }
        Counter::saturating_add(&self.total_count, count);
    }

    /// Zeroes every cell, the total count and the overflow flag in place.
    pub fn reset(&self) {
        for cell in self.counts.iter() {
            cell.reset();
        }
        self.total_count.store(0, Ordering::Relaxed);
        self.overflowed.store(false, Ordering::Relaxed);
    }

    /// Adds the counts of `other` into this histogram.
    ///
    /// Identical layouts are added cell by cell. Otherwise every non-empty
    /// cell of `other` is re-recorded at its lowest value, which requires
    /// all of `other`'s recorded values to fit in this histogram's covered
    /// range; if they don't, nothing is modified and
    /// `Error::IncompatibleHistogram` is returned.
    ///
    /// The total count grows by the sum of the cells read from `other`, so
    /// the result stays self-consistent even if `other` is being written
    /// concurrently.
    pub fn add<D: Counter>(&self, other: &Histogram<D>) -> Result<()> {
        if self.codec.is_layout_compatible(&other.codec) {
            let mut observed = 0u64;
            for (mine, theirs) in self.counts.iter().zip(other.counts.iter()) {
                let count = theirs.load();
                if count != 0 {
                    if mine.saturating_add(count) {
                        self.overflowed.store(true, Ordering::Relaxed);
                    }
                    observed = observed.saturating_add(count);
                }
            }
            Counter::saturating_add(&self.total_count, observed);
        } else if let Some(top) = other.counts.iter().rposition(|cell| cell.load() != 0) {
            let top_value = other
                .codec
                .highest_equivalent(other.codec.value_from_index(top));
            if top_value > self.codec.max_covered_value() {
                return Err(Error::IncompatibleHistogram(format!(
                    "recorded value {} exceeds the covered range (max {})",
                    top_value,
                    self.codec.max_covered_value()
                )));
            }
            for (index, cell) in other.counts.iter().enumerate().take(top + 1) {
                let count = cell.load();
                if count != 0 {
                    self.record_count_at(other.codec.value_from_index(index), count);
                }
            }
        }

        if other.has_overflowed() {
            self.overflowed.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }
}

// Read-side queries.
impl<C: Counter> Histogram<C> {
    pub fn total_count(&self) -> u64 {
        Counter::load(&self.total_count)
    }

    pub fn highest_trackable_value(&self) -> i64 {
        self.codec.highest_trackable_value()
    }

    pub fn significant_digits(&self) -> u8 {
        self.codec.significant_digits()
    }

    /// Count of the cell `value` falls into.
    pub fn count_at(&self, value: i64) -> Result<u64> {
        Ok(self.counts[self.clamped_index(non_negative(value)?)].load())
    }

    /// Sum of the cells covering `low..=high`.
    pub fn count_between(&self, low: i64, high: i64) -> Result<u64> {
        let low = self.clamped_index(non_negative(low)?);
        let high = self.clamped_index(non_negative(high)?);
        if low > high {
            return Ok(0);
        }
        Ok(self.counts[low..=high]
            .iter()
            .fold(0u64, |sum, cell| sum.saturating_add(cell.load())))
    }

    /// Iterates over every cell in value order, empty ones included.
    pub fn iter_all(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.counts.iter().enumerate().map(move |(index, cell)| {
            let start = self.codec.value_from_index(index);
            Bucket {
                start: start as i64,
                end: self.codec.highest_equivalent(start).min(i64::MAX as u64) as i64,
                count: cell.load(),
            }
        })
    }

    /// Iterates over the cells with at least one observation.
    pub fn iter_recorded(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.iter_all().filter(|bucket| bucket.count > 0)
    }

    /// Lowest recorded value at the histogram's resolution.
    pub fn min(&self) -> Option<i64> {
        self.iter_recorded().next().map(|bucket| bucket.start)
    }

    /// Highest recorded value at the histogram's resolution.
    pub fn max(&self) -> Option<i64> {
        let top = self.counts.iter().rposition(|cell| cell.load() != 0)?;
        Some(self.clamped(self.codec.highest_equivalent(self.codec.value_from_index(top))))
    }

    pub fn mean(&self) -> Option<f64> {
        let mut total = 0u64;
        let mut sum = 0f64;
        for bucket in self.iter_recorded() {
            let median = self.codec.lowest_equivalent(bucket.start as u64)
                + (self.codec.equivalent_range_len(bucket.start as u64) >> 1);
            sum += median as f64 * bucket.count as f64;
            total = total.saturating_add(bucket.count);
        }
        if total == 0 {
            None
        } else {
            Some(sum / total as f64)
        }
    }

    /// The value below which `percentile` percent of the observations fall,
    /// reported as the highest value equivalent to it. Returns 0 for an
    /// empty histogram.
    pub fn value_at_percentile(&self, percentile: f64) -> i64 {
        let percentile = percentile.max(0.0).min(100.0);
        let total = self.cells_total();
        if total == 0 {
            return 0;
        }

        let wanted = ((percentile / 100.0) * total as f64 + 0.5) as u64;
        let wanted = wanted.max(1);

        let mut seen = 0u64;
        for (index, cell) in self.counts.iter().enumerate() {
            seen = seen.saturating_add(cell.load());
            if seen >= wanted {
                let value = self.codec.value_from_index(index);
                return if percentile == 0.0 {
                    self.clamped(self.codec.lowest_equivalent(value))
                } else {
                    self.clamped(self.codec.highest_equivalent(value))
                };
            }
        }
        self.max().unwrap_or(0)
    }

    /// Percentage of observations at or below `value`'s cell.
    pub fn percentile_below(&self, value: i64) -> Result<f64> {
        let total = self.cells_total();
        if total == 0 {
            return Ok(100.0);
        }
        let below = self.count_between(0, value)?;
        Ok(100.0 * below as f64 / total as f64)
    }

    pub fn lowest_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec.lowest_equivalent_value(value)
    }

    pub fn highest_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec.highest_equivalent_value(value)
    }

    pub fn size_of_equivalent_value_range(&self, value: i64) -> Result<i64> {
        self.codec.size_of_equivalent_value_range(value)
    }

    pub fn median_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec.median_equivalent_value(value)
    }

    pub fn next_non_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec.next_non_equivalent_value(value)
    }

    pub fn values_are_equivalent(&self, value1: i64, value2: i64) -> Result<bool> {
        self.codec.values_are_equivalent(value1, value2)
    }

    fn clamped_index(&self, value: u64) -> usize {
        self.codec.index_of(value).min(self.counts.len() - 1)
    }

    fn clamped(&self, value: u64) -> i64 {
        value.min(i64::MAX as u64) as i64
    }

    fn cells_total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |sum, cell| sum.saturating_add(cell.load()))
    }
}

impl<C> fmt::Debug for Histogram<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("codec", &self.codec)
            .field("total_count", &self.total_count.load(Ordering::Relaxed))
            .field("overflowed", &self.overflowed.load(Ordering::Relaxed))
            .finish()
    }
}
