use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use shardhist::Config;

use crate::distribution::{self, Distribution};

/// Drive a sharded histogram with synthetic latencies
#[derive(Parser, Debug, Clone)]
#[command(name = "shardhist-bench")]
#[command(version)]
pub struct BenchArgs {
    /// Number of concurrent workers
    #[arg(long, default_value = "16")]
    pub concurrency: NonZeroUsize,

    /// Total number of operations to issue
    #[arg(long, default_value = "1000000")]
    pub operations: u64,

    /// Maximum rate of operations in op/s (0 for unlimited)
    #[arg(long, default_value = "0")]
    pub max_rate: u64,

    /// Latency distribution in microseconds: fixed:N, uniform:A..B or exp:MEAN
    #[arg(long, default_value = "exp:500")]
    pub latency_dist: String,

    /// Highest latency the histogram tracks, in microseconds
    #[arg(long, default_value = "3600000000")]
    pub highest_trackable_value: i64,

    /// Significant decimal digits kept by the histogram (0-5)
    #[arg(long, default_value = "3")]
    pub significant_digits: u8,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub struct BenchDescription {
    pub operation_count: u64,
    pub concurrency: NonZeroUsize,
    pub rate_limit_per_second: Option<NonZeroU64>,
    pub latency_dist: Arc<dyn Distribution>,
    pub histogram: Config,
}

impl BenchArgs {
    pub fn into_description(self) -> Result<Arc<BenchDescription>> {
        let latency_dist: Arc<dyn Distribution> =
            distribution::parse_distribution(&self.latency_dist)?.into();

        let histogram = Config::new(self.highest_trackable_value, self.significant_digits);
        // Fail on a bad histogram configuration before any worker starts.
        histogram.codec()?;

        if let Some(rate) = NonZeroU64::new(self.max_rate) {
            anyhow::ensure!(
                rate.get() <= 1_000_000,
                "The maximum rate cannot exceed 1000000 op/s, got {}",
                rate
            );
        }

        Ok(Arc::new(BenchDescription {
            operation_count: self.operations,
            concurrency: self.concurrency,
            rate_limit_per_second: NonZeroU64::new(self.max_rate),
            latency_dist,
            histogram,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = BenchArgs::parse_from(["shardhist-bench"]);
        assert_eq!(args.concurrency.get(), 16);
        assert_eq!(args.operations, 1_000_000);
        assert_eq!(args.max_rate, 0);

        let desc = args.into_description().unwrap();
        assert!(desc.rate_limit_per_second.is_none());
        assert_eq!(desc.histogram.highest_trackable_value(), 3_600_000_000);
        assert_eq!(desc.histogram.significant_digits(), 3);
    }

    #[test]
    fn test_overrides() {
        let args = BenchArgs::parse_from([
            "shardhist-bench",
            "--concurrency",
            "4",
            "--max-rate",
            "5000",
            "--latency-dist",
            "uniform:100..2k",
            "--significant-digits",
            "2",
        ]);
        let desc = args.into_description().unwrap();
        assert_eq!(desc.concurrency.get(), 4);
        assert_eq!(desc.rate_limit_per_second.map(NonZeroU64::get), Some(5000));
        assert_eq!(desc.histogram.significant_digits(), 2);
    }

    #[test]
    fn test_rejects_bad_histogram() {
        let args = BenchArgs::parse_from(["shardhist-bench", "--significant-digits", "7"]);
        assert!(args.into_description().is_err());

        let args = BenchArgs::parse_from(["shardhist-bench", "--highest-trackable-value", "1"]);
        assert!(args.into_description().is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(BenchArgs::try_parse_from(["shardhist-bench", "--concurrency", "0"]).is_err());
    }
}
