//! Uniform key sampling over a keyspace walked once.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reservoir holding at most `capacity` keys, each key offered so far
/// being equally likely to be kept.
#[derive(Debug)]
pub struct KeySample {
    capacity: usize,
    seen: u64,
    keys: Vec<String>,
    rng: StdRng,
}

impl KeySample {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    pub fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            seen: 0,
            keys: Vec::with_capacity(capacity.min(1024)),
            rng,
        }
    }

    pub fn offer(&mut self, key: String) {
        self.seen += 1;
        if self.keys.len() < self.capacity {
            self.keys.push(key);
            return;
        }

        let slot = self.rng.gen_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.keys[slot as usize] = key;
        }
    }

    /// Keys offered so far, kept or not.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn into_keys(self) -> Vec<String> {
        self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_small_stream_is_kept_whole() {
        let mut sample = KeySample::new(10);
        for i in 0..4 {
            sample.offer(format!("k{i}"));
        }
        assert_eq!(sample.into_keys(), vec!["k0", "k1", "k2", "k3"]);
    }

    #[test]
    fn test_large_stream_is_bounded() {
        let mut sample = KeySample::with_rng(100, StdRng::seed_from_u64(7));
        for i in 0..10_000 {
            sample.offer(format!("k{i}"));
        }
        assert_eq!(sample.seen(), 10_000);

        let keys = sample.into_keys();
        assert_eq!(keys.len(), 100);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 100);
        // Late keys must be able to displace early ones.
        assert!(keys.iter().any(|k| k[1..].parse::<u32>().unwrap() >= 100));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut sample = KeySample::new(0);
        sample.offer("a".into());
        assert!(sample.into_keys().is_empty());
    }
}
