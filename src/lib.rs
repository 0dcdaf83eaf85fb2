//! Concurrent latency/size histogram with per-thread shards.
//!
//! Values are recorded into a log-linear [`Histogram`] that keeps a fixed
//! number of significant decimal digits over its whole range. A
//! [`ShardedHistogram`] gives every recording thread its own shard and
//! folds them together on demand.
//!
//! ```
//! use shardhist::ShardedHistogram;
//!
//! let histogram = ShardedHistogram::new(3_600_000_000, 3).unwrap();
//! std::thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| histogram.record(1_500).unwrap());
//!     }
//! });
//!
//! let data = histogram.query_data();
//! assert_eq!(data.total_count(), 4);
//! assert!(data.values_are_equivalent(data.value_at_percentile(99.0), 1_500).unwrap());
//! ```

mod codec;
mod config;
mod counter;
mod error;
mod histogram;
mod registry;
mod sharded_histogram;

pub use codec::BucketCodec;
pub use config::Config;
pub use counter::Counter;
pub use error::{Error, Result};
pub use histogram::{Bucket, Histogram};
pub use registry::ShardRegistry;
pub use sharded_histogram::{ShardedHistogram, Snapshot};
