use std::sync::atomic::AtomicU64;

use thread_local::ThreadLocal;
use tracing::debug;

use crate::codec::BucketCodec;
use crate::counter::Counter;
use crate::histogram::Histogram;

/// Maps each recording thread to its own lazily created histogram shard.
///
/// `ThreadLocal` keys slots by a per-thread id and publishes a new slot
/// with an atomic store, so the first touch from a thread creates exactly
/// one shard and every later lookup from that thread is a lock-free read.
/// Shards are never removed: the registry grows with the number of distinct
/// threads that ever recorded. `ThreadLocal` recycles the ids of exited
/// threads, so a new thread may inherit an exited thread's shard and keep
/// adding to its counts.
pub struct ShardRegistry<C: Counter = AtomicU64> {
    shards: ThreadLocal<Histogram<C>>,
    codec: BucketCodec,
}

impl<C: Counter> ShardRegistry<C> {
    pub fn new(codec: BucketCodec) -> Self {
        Self {
            shards: ThreadLocal::new(),
            codec,
        }
    }

    /// The calling thread's shard, created on first use.
    pub fn shard(&self) -> &Histogram<C> {
        self.shards.get_or(|| {
            let thread = std::thread::current();
            debug!(
                thread_name = thread.name().unwrap_or("<unnamed>"),
                thread_id = ?thread.id(),
                "creating histogram shard"
            );
            Histogram::with_codec(self.codec.clone())
        })
    }

    /// Every shard created so far, in no particular order.
    ///
    /// Owning threads may keep recording into the shards while they are
    /// being iterated.
    pub fn iter(&self) -> impl Iterator<Item = &Histogram<C>> + '_ {
        self.shards.iter()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn codec(&self) -> &BucketCodec {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    fn registry() -> ShardRegistry {
        ShardRegistry::new(BucketCodec::new(1_000_000, 2).unwrap())
    }

    #[test]
    fn test_one_shard_per_thread() {
        let registry = registry();
        assert!(registry.is_empty());

        let first = registry.shard() as *const Histogram;
        let second = registry.shard() as *const Histogram;
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_first_touch() {
        const THREADS: usize = 8;

        let registry = registry();
        let barrier = Barrier::new(THREADS);
        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    registry.shard().record(1).unwrap();
                    registry.shard().record(2).unwrap();
                    barrier.wait();
                });
            }
        });

        assert_eq!(registry.len(), THREADS);
        for shard in registry.iter() {
            assert_eq!(shard.total_count(), 2);
        }
    }
}
