//! Saturating atomic count cells.
//!
//! A histogram's counts array is made of `Counter` cells. The cell width
//! bounds how many occurrences a single cell can hold; once a cell reaches
//! its maximum it stays there instead of wrapping, and the owning histogram
//! raises its overflow flag.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// An atomic count cell that clamps at its maximum.
///
/// All accesses are `Relaxed`: cells are independent statistics and
/// readers only need each individual load to be untorn.
pub trait Counter: Default + Send + Sync + 'static {
    /// Largest count a cell can hold.
    const MAX: u64;

    fn load(&self) -> u64;

    /// Adds `n`, clamping at `MAX`. Returns `true` if the result was clamped.
    fn saturating_add(&self, n: u64) -> bool;

    fn reset(&self);
}

macro_rules! impl_counter {
    ($atomic:ty, $prim:ty) => {
        impl Counter for $atomic {
            const MAX: u64 = <$prim>::MAX as u64;

            #[inline]
            fn load(&self) -> u64 {
                <$atomic>::load(self, Ordering::Relaxed) as u64
            }

            #[inline]
            fn saturating_add(&self, n: u64) -> bool {
                let too_wide = n > Self::MAX;
                let delta = if too_wide { <$prim>::MAX } else { n as $prim };
                let mut clamped = too_wide;
                let _ = self.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    let (next, wrapped) = match current.checked_add(delta) {
                        Some(next) => (next, false),
                        None => (<$prim>::MAX, true),
                    };
                    clamped = too_wide || wrapped;
                    if next == current {
                        None
                    } else {
                        Some(next)
                    }
                });
                clamped
            }

            #[inline]
            fn reset(&self) {
                self.store(0, Ordering::Relaxed);
            }
        }
    };
}

impl_counter!(AtomicU8, u8);
impl_counter!(AtomicU16, u16);
impl_counter!(AtomicU32, u32);
impl_counter!(AtomicU64, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_saturates() {
        let c = AtomicU8::default();
        assert!(!c.saturating_add(200));
        assert!(!c.saturating_add(55));
        assert_eq!(Counter::load(&c), 255);
        assert!(c.saturating_add(1));
        assert_eq!(Counter::load(&c), 255);

        Counter::reset(&c);
        assert_eq!(Counter::load(&c), 0);
    }

    #[test]
    fn test_counter_clamps_wide_increment() {
        let c = AtomicU16::default();
        assert!(c.saturating_add(1 << 20));
        assert_eq!(Counter::load(&c), u16::MAX as u64);
    }

    #[test]
    fn test_counter_zero_increment() {
        let c = AtomicU32::default();
        assert!(!c.saturating_add(0));
        assert_eq!(Counter::load(&c), 0);
    }

    #[test]
    fn test_wide_counter() {
        let c = AtomicU64::default();
        assert!(!c.saturating_add(u64::MAX - 1));
        assert!(c.saturating_add(2));
        assert_eq!(Counter::load(&c), u64::MAX);
    }
}
