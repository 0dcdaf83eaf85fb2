use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::codec::BucketCodec;
use crate::config::Config;
use crate::counter::Counter;
use crate::error::Result;
use crate::histogram::{Bucket, Histogram};
use crate::registry::ShardRegistry;

/// A sharded histogram.
///
/// This structure is optimized for frequent writes and seldom reads.
/// For each recording thread, it keeps a separate shard histogram. Once
/// a thread has its shard, recording into it touches no lock and no memory
/// shared with other recorders.
///
/// When the histogram is needed for reading, all shards are folded into a
/// fresh main histogram. That fold is a best-effort snapshot, not a
/// transaction: recorders are not paused, so shards are read at slightly
/// different moments and a value recorded concurrently with `combine()` may
/// or may not be included. There is no point-in-time consistency across
/// shards. Each individual count is read atomically, so the result is
/// always a valid histogram.
///
/// The main histogram always has 64-bit cells, whatever `C` the shards use,
/// so shards that each stay below their cell limit never saturate when
/// added together. The `parking_lot::Mutex` around it is held only to swap
/// in a newly folded histogram.
pub struct ShardedHistogram<C: Counter = AtomicU64> {
    shards: ShardRegistry<C>,
    main: Mutex<Arc<Histogram>>,
    config: Config,
}

impl ShardedHistogram {
    /// A sharded histogram with 64-bit count cells.
    pub fn new(highest_trackable_value: i64, significant_digits: u8) -> Result<Self> {
        Self::from_config(Config::new(highest_trackable_value, significant_digits))
    }
}

impl<C: Counter> ShardedHistogram<C> {
    /// A sharded histogram whose shard count cells are `C`.
    pub fn with_counter(highest_trackable_value: i64, significant_digits: u8) -> Result<Self> {
        Self::from_config(Config::new(highest_trackable_value, significant_digits))
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let codec = config.codec()?;
        Ok(Self {
            main: Mutex::new(Arc::new(Histogram::with_codec(codec.clone()))),
            shards: ShardRegistry::new(codec),
            config,
        })
    }

    /// Records `value` into the calling thread's shard.
    pub fn record(&self, value: i64) -> Result<()> {
        self.shards.shard().record(value)
    }

    /// Records `value` into the calling thread's shard, back-filling
    /// samples missed during a stall longer than `expected_interval`.
    pub fn record_with_interval(&self, value: i64, expected_interval: i64) -> Result<()> {
        self.shards
            .shard()
            .record_with_interval(value, expected_interval)
    }

    /// Folds every shard into a new main histogram and publishes it.
    ///
    /// Snapshots taken earlier keep the histogram they were given.
    pub fn combine(&self) {
        self.publish(self.fold());
    }

    fn fold(&self) -> Arc<Histogram> {
        let combined = Histogram::with_codec(self.codec().clone());
        let mut shards = 0;
        for shard in self.shards.iter() {
            // Shards share the main histogram's layout, so this cannot fail.
            if let Err(err) = combined.add(shard) {
                tracing::error!(%err, "skipping shard with a foreign layout");
            }
            shards += 1;
        }
        trace!(shards, total_count = combined.total_count(), "combined shards");
        Arc::new(combined)
    }

    fn publish(&self, combined: Arc<Histogram>) {
        *self.main.lock() = combined;
    }

    /// Combines all shards and returns a read-only view of the result.
    pub fn query_data(&self) -> Snapshot {
        let combined = self.fold();
        self.publish(combined.clone());
        Snapshot { main: combined }
    }

    /// The histogram published by the latest `combine()`, `query_data()` or
    /// `reset()`, without folding the shards again.
    pub fn last_combined(&self) -> Snapshot {
        Snapshot {
            main: self.main.lock().clone(),
        }
    }

    /// Resets every shard and the main histogram. Shards stay registered.
    pub fn reset(&self) {
        for shard in self.shards.iter() {
            shard.reset();
        }
        self.publish(Arc::new(Histogram::with_codec(self.codec().clone())));
    }

    pub fn highest_trackable_value(&self) -> i64 {
        self.config.highest_trackable_value()
    }

    pub fn significant_digits(&self) -> u8 {
        self.config.significant_digits()
    }

    /// True if any shard has saturated a count cell. Like `combine()`, this
    /// looks at each shard once, at slightly different moments.
    pub fn has_overflowed(&self) -> bool {
        self.shards.iter().any(|shard| shard.has_overflowed())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn codec(&self) -> &BucketCodec {
        self.shards.codec()
    }

    pub fn lowest_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec().lowest_equivalent_value(value)
    }

    pub fn highest_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec().highest_equivalent_value(value)
    }

    pub fn size_of_equivalent_value_range(&self, value: i64) -> Result<i64> {
        self.codec().size_of_equivalent_value_range(value)
    }

    pub fn median_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec().median_equivalent_value(value)
    }

    pub fn next_non_equivalent_value(&self, value: i64) -> Result<i64> {
        self.codec().next_non_equivalent_value(value)
    }

    pub fn values_are_equivalent(&self, value1: i64, value2: i64) -> Result<bool> {
        self.codec().values_are_equivalent(value1, value2)
    }
}

/// Read-only view of a combined histogram.
///
/// The view owns the histogram it was built from. Later `combine()`,
/// `query_data()` or `reset()` calls publish a new main histogram and leave
/// this one untouched.
#[derive(Clone)]
pub struct Snapshot {
    main: Arc<Histogram>,
}

impl Snapshot {
    pub fn total_count(&self) -> u64 {
        self.main.total_count()
    }

    /// True if a combined cell saturated or any shard had overflowed at the
    /// time it was folded in.
    pub fn has_overflowed(&self) -> bool {
        self.main.has_overflowed()
    }

    pub fn count_at(&self, value: i64) -> Result<u64> {
        self.main.count_at(value)
    }

    pub fn count_between(&self, low: i64, high: i64) -> Result<u64> {
        self.main.count_between(low, high)
    }

    pub fn iter_all(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.main.iter_all()
    }

    pub fn iter_recorded(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.main.iter_recorded()
    }

    pub fn min(&self) -> Option<i64> {
        self.main.min()
    }

    pub fn max(&self) -> Option<i64> {
        self.main.max()
    }

    pub fn mean(&self) -> Option<f64> {
        self.main.mean()
    }

    pub fn value_at_percentile(&self, percentile: f64) -> i64 {
        self.main.value_at_percentile(percentile)
    }

    pub fn percentile_below(&self, value: i64) -> Result<f64> {
        self.main.percentile_below(value)
    }

    pub fn lowest_equivalent_value(&self, value: i64) -> Result<i64> {
        self.main.lowest_equivalent_value(value)
    }

    pub fn highest_equivalent_value(&self, value: i64) -> Result<i64> {
        self.main.highest_equivalent_value(value)
    }

    pub fn size_of_equivalent_value_range(&self, value: i64) -> Result<i64> {
        self.main.size_of_equivalent_value_range(value)
    }

    pub fn median_equivalent_value(&self, value: i64) -> Result<i64> {
        self.main.median_equivalent_value(value)
    }

    pub fn next_non_equivalent_value(&self, value: i64) -> Result<i64> {
        self.main.next_non_equivalent_value(value)
    }

    pub fn values_are_equivalent(&self, value1: i64, value2: i64) -> Result<bool> {
        self.main.values_are_equivalent(value1, value2)
    }

    pub fn codec(&self) -> &BucketCodec {
        self.main.codec()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU8;

    use super::*;
    use crate::error::Error;

    #[test]
    fn test_configuration() {
        let h = ShardedHistogram::new(1_000_000, 3).unwrap();
        assert_eq!(h.highest_trackable_value(), 1_000_000);
        assert_eq!(h.significant_digits(), 3);
        assert_eq!(h.shard_count(), 0);

        assert!(matches!(
            ShardedHistogram::new(1, 3),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ShardedHistogram::new(1000, 6),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_record_and_query() {
        let h = ShardedHistogram::new(1_000_000, 3).unwrap();
        h.record(10).unwrap();
        h.record(20).unwrap();
        assert!(h.record(-3).is_err());

        let data = h.query_data();
        assert_eq!(data.total_count(), 2);
        assert_eq!(data.count_at(10).unwrap(), 1);
        assert_eq!(data.min(), Some(10));
        assert_eq!(data.max(), Some(20));
        drop(data);

        assert_eq!(h.shard_count(), 1);
    }

    #[test]
    fn test_combine_is_repeatable() {
        let h = ShardedHistogram::new(1_000_000, 3).unwrap();
        h.record(10).unwrap();
        h.combine();
        h.combine();
        assert_eq!(h.query_data().total_count(), 1);
    }

    #[test]
    fn test_reset_keeps_shards() {
        let h = ShardedHistogram::<AtomicU8>::with_counter(1_000_000, 3).unwrap();
        for _ in 0..256 {
            h.record(7).unwrap();
        }
        assert!(h.has_overflowed());

        h.reset();
        assert!(!h.has_overflowed());
        assert_eq!(h.shard_count(), 1);
        let data = h.query_data();
        assert_eq!(data.total_count(), 0);
        assert!(!data.has_overflowed());
    }

    #[test]
    fn test_snapshot_outlives_combine_and_reset() {
        let h = ShardedHistogram::new(1_000_000, 3).unwrap();
        h.record(10).unwrap();

        let data = h.query_data();
        h.record(20).unwrap();
        assert_eq!(h.last_combined().total_count(), 1);
        h.combine();
        assert_eq!(data.total_count(), 1);
        assert_eq!(h.last_combined().total_count(), 2);

        h.reset();
        assert_eq!(data.total_count(), 1);
        assert_eq!(data.count_at(10).unwrap(), 1);
        assert_eq!(h.last_combined().total_count(), 0);
        assert_eq!(h.query_data().total_count(), 0);
    }

    #[test]
    fn test_main_histogram_is_wider_than_shards() {
        let h = ShardedHistogram::<AtomicU8>::with_counter(1_000_000, 3).unwrap();
        let shard = h.shards.shard();
        for _ in 0..200 {
            shard.record(42).unwrap();
        }
        let other = Histogram::<AtomicU8>::with_codec(h.codec().clone());
        for _ in 0..200 {
            other.record(42).unwrap();
        }

        let data = h.query_data();
        data.main.add(&other).unwrap();
        assert_eq!(data.count_at(42).unwrap(), 400);
        assert_eq!(data.total_count(), 400);
        assert!(!data.has_overflowed());
    }

    #[test]
    fn test_equivalence_delegation() {
        let h = ShardedHistogram::new(3_600_000_000, 3).unwrap();
        assert_eq!(h.lowest_equivalent_value(10007).unwrap(), 10000);
        assert_eq!(h.highest_equivalent_value(10008).unwrap(), 10015);
        assert_eq!(h.size_of_equivalent_value_range(8192).unwrap(), 8);
        assert_eq!(h.median_equivalent_value(8000).unwrap(), 8002);
        assert_eq!(h.next_non_equivalent_value(10007).unwrap(), 10008);
        assert!(h.values_are_equivalent(10000, 10007).unwrap());
        assert!(h.lowest_equivalent_value(-1).is_err());
    }
}
