use crate::codec::BucketCodec;
use crate::counter::Counter;
use crate::error::Result;
use crate::histogram::Histogram;

/// Histogram configuration, validated when something is built from it.
///
/// ```
/// use shardhist::{Config, Histogram};
///
/// let histogram: Histogram = Config::new(3_600_000_000, 3).build().unwrap();
/// histogram.record(1_250).unwrap();
/// assert_eq!(histogram.total_count(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    highest_trackable_value: i64,
    significant_digits: u8,
    lowest_discernible_value: i64,
}

impl Config {
    pub fn new(highest_trackable_value: i64, significant_digits: u8) -> Self {
        Self {
            highest_trackable_value,
            significant_digits,
            lowest_discernible_value: 1,
        }
    }

    /// Smallest value distinguishable from 0. Values below it share the
    /// first cell.
    pub fn lowest_discernible_value(mut self, value: i64) -> Self {
        self.lowest_discernible_value = value;
        self
    }

    pub fn highest_trackable_value(&self) -> i64 {
        self.highest_trackable_value
    }

    pub fn significant_digits(&self) -> u8 {
        self.significant_digits
    }

    pub fn codec(&self) -> Result<BucketCodec> {
        BucketCodec::with_bounds(
            self.lowest_discernible_value,
            self.highest_trackable_value,
            self.significant_digits,
        )
    }

    pub fn build<C: Counter>(&self) -> Result<Histogram<C>> {
        Ok(Histogram::with_codec(self.codec()?))
    }
}
