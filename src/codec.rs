//! Value to bucket/sub-bucket mapping.
//!
//! Values are binned in two levels. The top level is logarithmic: bucket
//! `k` covers values up to `sub_bucket_count << (k + unit_magnitude)` in
//! steps of `1 << (k + unit_magnitude)`. The bottom level is linear: every
//! bucket is split into `sub_bucket_count` equally sized sub-buckets, which
//! is enough to keep `significant_digits` decimal digits of precision
//! anywhere in the range.
//!
//! Buckets overlap. The lower half of bucket `k > 0` covers exactly the
//! same values as all of buckets `0..k` together (with worse precision), so
//! only the upper half of every bucket except the first one gets storage:
//!
//! ```text
//! sub_bucket_count = 2048, unit_magnitude = 0
//!
//! bucket 0:     0 ..  2047  step 1  2048 cells
//! bucket 1:  2048 ..  4095  step 2  1024 cells
//! bucket 2:  4096 ..  8191  step 4  1024 cells
//! ...
//! ```

use crate::error::{non_negative, Error, Result};

const MAX_SIGNIFICANT_DIGITS: u8 = 5;

/// Derived layout constants for a histogram configuration.
///
/// A `BucketCodec` never changes after construction; two histograms built
/// from equal codecs have counts arrays of identical length and meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCodec {
    lowest_discernible_value: u64,
    highest_trackable_value: u64,
    significant_digits: u8,

    unit_magnitude: u32,
    sub_bucket_half_count_magnitude: u32,
    sub_bucket_count: u64,
    sub_bucket_half_count: u64,
    sub_bucket_mask: u64,
    leading_zero_count_base: u32,

    bucket_count: u32,
    counts_len: usize,
}

impl BucketCodec {
    /// Layout tracking values in `0..=highest_trackable_value` with unit
    /// resolution at the bottom of the range.
    pub fn new(highest_trackable_value: i64, significant_digits: u8) -> Result<Self> {
        Self::with_bounds(1, highest_trackable_value, significant_digits)
    }

    /// Layout whose smallest distinguishable step is `lowest_discernible_value`
    /// (rounded down to a power of two).
    pub fn with_bounds(
        lowest_discernible_value: i64,
        highest_trackable_value: i64,
        significant_digits: u8,
    ) -> Result<Self> {
        if lowest_discernible_value < 1 {
            return Err(Error::InvalidArgument(format!(
                "lowest discernible value must be >= 1, got {}",
                lowest_discernible_value
            )));
        }
        let lowest = lowest_discernible_value as u64;
        if highest_trackable_value < 2 || (highest_trackable_value as u64) < 2 * lowest {
            return Err(Error::InvalidArgument(format!(
                "highest trackable value must be >= 2 and >= 2 * {}, got {}",
                lowest, highest_trackable_value
            )));
        }
        if significant_digits > MAX_SIGNIFICANT_DIGITS {
            return Err(Error::InvalidArgument(format!(
                "significant digits must be between 0 and {}, got {}",
                MAX_SIGNIFICANT_DIGITS, significant_digits
            )));
        }
        let highest = highest_trackable_value as u64;

        // Unit resolution is needed up to 2 * 10^digits: at 3 digits, +/- 1
        // at 1000 is fine and so is +/- 2 at 2000, but not +/- 2 at 1999.
        let largest_with_unit_resolution = 2 * 10u64.pow(u32::from(significant_digits));

        let unit_magnitude = 63 - lowest.leading_zeros();
        let sub_bucket_count_magnitude = 64 - (largest_with_unit_resolution - 1).leading_zeros();
        let sub_bucket_half_count_magnitude = sub_bucket_count_magnitude.max(1) - 1;
        if unit_magnitude + sub_bucket_half_count_magnitude > 61 {
            return Err(Error::InvalidArgument(format!(
                "lowest discernible value {} is too large for {} significant digits",
                lowest, significant_digits
            )));
        }

        let sub_bucket_count = 1u64 << (sub_bucket_half_count_magnitude + 1);
        let sub_bucket_half_count = sub_bucket_count / 2;
        let sub_bucket_mask = (sub_bucket_count - 1) << unit_magnitude;

        let bucket_count = buckets_needed_to_cover(highest, sub_bucket_count, unit_magnitude);
        let counts_len = (bucket_count as usize + 1) * sub_bucket_half_count as usize;

        Ok(Self {
            lowest_discernible_value: lowest,
            highest_trackable_value: highest,
            significant_digits,
            unit_magnitude,
            sub_bucket_half_count_magnitude,
            sub_bucket_count,
            sub_bucket_half_count,
            sub_bucket_mask,
            leading_zero_count_base: 64 - unit_magnitude - sub_bucket_half_count_magnitude - 1,
            bucket_count,
            counts_len,
        })
    }

    pub fn highest_trackable_value(&self) -> i64 {
        self.highest_trackable_value as i64
    }

    pub fn lowest_discernible_value(&self) -> i64 {
        self.lowest_discernible_value as i64
    }

    pub fn significant_digits(&self) -> u8 {
        self.significant_digits
    }

    pub fn unit_magnitude(&self) -> u32 {
        self.unit_magnitude
    }

    pub fn sub_bucket_count(&self) -> u64 {
        self.sub_bucket_count
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Number of count cells a histogram with this layout needs.
    pub fn counts_len(&self) -> usize {
        self.counts_len
    }

    /// True when counts arrays of both layouts can be added cell by cell.
    pub fn is_layout_compatible(&self, other: &BucketCodec) -> bool {
        self.unit_magnitude == other.unit_magnitude
            && self.sub_bucket_count == other.sub_bucket_count
            && self.bucket_count == other.bucket_count
    }

    /// The `(bucket, sub_bucket)` coordinate of `value`.
    pub fn location(&self, value: i64) -> Result<(u32, u64)> {
        let value = non_negative(value)?;
        let bucket = self.bucket_index_of(value);
        Ok((bucket, self.sub_bucket_index_of(value, bucket)))
    }

    pub fn lowest_equivalent_value(&self, value: i64) -> Result<i64> {
        Ok(clamp(self.lowest_equivalent(non_negative(value)?)))
    }

    pub fn highest_equivalent_value(&self, value: i64) -> Result<i64> {
        Ok(clamp(self.highest_equivalent(non_negative(value)?)))
    }

    pub fn size_of_equivalent_value_range(&self, value: i64) -> Result<i64> {
        Ok(clamp(self.equivalent_range_len(non_negative(value)?)))
    }

    /// The middle of the equivalent range, rounded up.
    pub fn median_equivalent_value(&self, value: i64) -> Result<i64> {
        let value = non_negative(value)?;
        Ok(clamp(
            self.lowest_equivalent(value) + (self.equivalent_range_len(value) >> 1),
        ))
    }

    /// Saturates at `i64::MAX` for values in the topmost representable range.
    pub fn next_non_equivalent_value(&self, value: i64) -> Result<i64> {
        let value = non_negative(value)?;
        Ok(clamp(
            self.lowest_equivalent(value) + self.equivalent_range_len(value),
        ))
    }

    pub fn values_are_equivalent(&self, value1: i64, value2: i64) -> Result<bool> {
        Ok(self.lowest_equivalent_value(value1)? == self.lowest_equivalent_value(value2)?)
    }

    pub(crate) fn bucket_index_of(&self, value: u64) -> u32 {
        // Small values are masked up into bucket 0; every further leading
        // bit past bucket 0's range is one more doubling.
        self.leading_zero_count_base - (value | self.sub_bucket_mask).leading_zeros()
    }

    pub(crate) fn sub_bucket_index_of(&self, value: u64, bucket: u32) -> u64 {
        value >> (bucket + self.unit_magnitude)
    }

    fn value_from_location(&self, bucket: u32, sub_bucket: u64) -> u64 {
        sub_bucket << (bucket + self.unit_magnitude)
    }

    /// Cell index for `value`. May be `>= counts_len()` for values above the
    /// covered range.
    pub(crate) fn index_of(&self, value: u64) -> usize {
        let bucket = self.bucket_index_of(value);
        let sub_bucket = self.sub_bucket_index_of(value, bucket);
        let bucket_base = ((bucket as u64) + 1) << self.sub_bucket_half_count_magnitude;
        (bucket_base + sub_bucket - self.sub_bucket_half_count) as usize
    }

    /// Lowest value counted in cell `index`.
    pub(crate) fn value_from_index(&self, index: usize) -> u64 {
        let index = index as u64;
        let bucket = (index >> self.sub_bucket_half_count_magnitude) as u32;
        let sub_bucket = (index & (self.sub_bucket_half_count - 1)) + self.sub_bucket_half_count;
        if bucket == 0 {
            self.value_from_location(0, sub_bucket - self.sub_bucket_half_count)
        } else {
            self.value_from_location(bucket - 1, sub_bucket)
        }
    }

    pub(crate) fn lowest_equivalent(&self, value: u64) -> u64 {
        let bucket = self.bucket_index_of(value);
        self.value_from_location(bucket, self.sub_bucket_index_of(value, bucket))
    }

    pub(crate) fn highest_equivalent(&self, value: u64) -> u64 {
        self.lowest_equivalent(value) + (self.equivalent_range_len(value) - 1)
    }

    pub(crate) fn equivalent_range_len(&self, value: u64) -> u64 {
        let bucket = self.bucket_index_of(value);
        let sub_bucket = self.sub_bucket_index_of(value, bucket);
        let adjusted = if sub_bucket >= self.sub_bucket_count {
            bucket + 1
        } else {
            bucket
        };
        1 << (self.unit_magnitude + adjusted)
    }

    /// Highest value whose cell lies inside the counts array.
    pub(crate) fn max_covered_value(&self) -> u64 {
        self.highest_equivalent(self.value_from_index(self.counts_len - 1))
    }
}

fn buckets_needed_to_cover(value: u64, sub_bucket_count: u64, unit_magnitude: u32) -> u32 {
    let mut smallest_untrackable = sub_bucket_count << unit_magnitude;
    let mut buckets_needed = 1;
    while smallest_untrackable <= value {
        if smallest_untrackable > u64::MAX / 2 {
            return buckets_needed + 1;
        }
        smallest_untrackable <<= 1;
        buckets_needed += 1;
    }
    buckets_needed
}

fn clamp(value: u64) -> i64 {
    value.min(i64::MAX as u64) as i64
}
