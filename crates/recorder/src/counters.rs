//! Per-process hit counters
//!
//! One `AtomicU32` per coverage slot. Instrumented code increments with
//! `Relaxed` ordering; readers tolerate counts that lag slightly behind.

use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed-size table of hit counters.
pub struct HitCounters {
    slots: Box<[AtomicU32]>,
}

impl HitCounters {
    /// `slot_count` zeroed counters.
    pub fn new(slot_count: usize) -> Self {
        HitCounters {
            slots: (0..slot_count).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Count one hit. Out-of-range slots are ignored.
    #[inline]
    pub fn inc(&self, slot: usize) {
        if let Some(c) = self.slots.get(slot) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count `n` hits.
    #[inline]
    pub fn add(&self, slot: usize, n: u32) {
        if let Some(c) = self.slots.get(slot) {
            c.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Current count of `slot`.
    pub fn get(&self, slot: usize) -> u32 {
        self.slots
            .get(slot)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Copy of every count.
    pub fn snapshot(&self) -> Vec<u32> {
        self.slots.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Take every count, resetting it to zero. Hits landing during the drain
    /// go to either this drain or the next one, never both.
    pub fn drain(&self) -> Vec<u32> {
        self.slots.iter().map(|c| c.swap(0, Ordering::Relaxed)).collect()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.slots
            .iter()
            .map(|c| c.load(Ordering::Relaxed) as u64)
            .sum()
    }
}

impl std::fmt::Debug for HitCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitCounters")
            .field("slots", &self.slots.len())
            .field("total", &self.total())
            .finish()
    }
}
