//! Flood suppression: duplicate `message_id`s seen within a sliding window
//! are suppressed (§4.6). Grounded in the source tree's
//! `network::dedup_filter` Bloom filter and dual-window rotation, generalized
//! from byte-slice items (there: raw message bytes) to `message_id` strings
//! and with the rotation interval taken from config instead of hardcoded.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct BloomFilter {
    bits: Vec<bool>,
    hash_count: usize,
    size: usize,
}

impl BloomFilter {
    fn new(approx_items: usize) -> Self {
        let size = (approx_items * 10).max(10_000);
        Self {
            bits: vec![false; size],
            hash_count: 7,
            size,
        }
    }

    fn contains(&self, item: &[u8]) -> bool {
        (0..self.hash_count).all(|i| self.bits[self.hash(item, i as u32) as usize % self.size])
    }

    fn insert(&mut self, item: &[u8]) {
        for i in 0..self.hash_count {
            let index = self.hash(item, i as u32) as usize % self.size;
            self.bits[index] = true;
        }
    }

    fn hash(&self, data: &[u8], seed: u32) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;
        let mut hash = FNV_OFFSET ^ (seed as u64);
        for &byte in data {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

/// Rotating dual-window deduplication filter. `check_and_insert` returns
/// `true` when `message_id` has already been seen in either window.
pub struct DedupFilter {
    current: RwLock<BloomFilter>,
    previous: RwLock<BloomFilter>,
    rotation_interval: Duration,
    last_rotation: RwLock<Instant>,
}

impl DedupFilter {
    pub fn new(rotation_interval: Duration) -> Self {
        Self {
            current: RwLock::new(BloomFilter::new(10_000)),
            previous: RwLock::new(BloomFilter::new(10_000)),
            rotation_interval,
            last_rotation: RwLock::new(Instant::now()),
        }
    }

    pub async fn check_and_insert(&self, message_id: &str) -> bool {
        let item = message_id.as_bytes();

        let seen = self.current.read().await.contains(item) || self.previous.read().await.contains(item);
        if seen {
            return true;
        }

        let should_rotate = Instant::now().duration_since(*self.last_rotation.read().await) > self.rotation_interval;
        if should_rotate {
            let mut last_rotation = self.last_rotation.write().await;
            if Instant::now().duration_since(*last_rotation) > self.rotation_interval {
                let fresh = BloomFilter::new(10_000);
                let mut previous = self.previous.write().await;
                let mut current = self.current.write().await;
                *previous = std::mem::replace(&mut *current, fresh);
                *last_rotation = Instant::now();
            }
        }

        self.current.write().await.insert(item);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_sighting_is_not_a_duplicate_second_is() {
        let filter = DedupFilter::new(Duration::from_secs(300));
        assert!(!filter.check_and_insert("msg-1").await);
        assert!(filter.check_and_insert("msg-1").await);
    }

    #[tokio::test]
    async fn distinct_ids_do_not_collide() {
        let filter = DedupFilter::new(Duration::from_secs(300));
        assert!(!filter.check_and_insert("msg-1").await);
        assert!(!filter.check_and_insert("msg-2").await);
    }

    #[tokio::test]
    async fn rotation_eventually_forgets_old_entries() {
        let filter = DedupFilter::new(Duration::from_millis(20));
        assert!(!filter.check_and_insert("msg-1").await);

        // Only a *fresh* id actually runs the rotation check (a seen id
        // returns early above). Drive two rotations with unrelated ids.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!filter.check_and_insert("msg-2").await);
        // msg-1 should have rotated into the previous window and still count
        // as a duplicate.
        assert!(filter.check_and_insert("msg-1").await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!filter.check_and_insert("msg-3").await);
        // A second rotation has now pushed msg-1 out of both windows.
        assert!(!filter.check_and_insert("msg-1").await);
    }
}
