//! Fixed-width score histogram over `[0, 1]`: one atomic counter per bin,
//! with percentile/quantile queries computed from the running bin counts
//! rather than a sort.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct ScoreHistogram {
    bins: Vec<AtomicU32>,
    count: AtomicU32,
}

impl ScoreHistogram {
    pub fn new(num_bins: usize) -> Self {
        let mut bins = Vec::with_capacity(num_bins.max(1));
        bins.resize_with(num_bins.max(1), || AtomicU32::new(0));
        Self { bins, count: AtomicU32::new(0) }
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn get_bin(&self, score: f32) -> usize {
        let clamped = score.clamp(0.0, 1.0);
        let idx = (clamped * self.bins.len() as f32) as usize;
        idx.min(self.bins.len() - 1)
    }

    pub fn increment(&self, score: f32) {
        self.bins[self.get_bin(score)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self, score: f32) {
        self.bins[self.get_bin(score)].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        }).ok();
        self.count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1))).ok();
    }

    /// Moves one entry from `old_score`'s bin to `new_score`'s bin.
    pub fn rebucket(&self, old_score: f32, new_score: f32) {
        let old_bin = self.get_bin(old_score);
        let new_bin = self.get_bin(new_score);
        if old_bin == new_bin {
            return;
        }
        self.bins[old_bin].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        }).ok();
        self.bins[new_bin].fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Fraction of live entries scoring `<= score`, as an integer 0..=100.
    pub fn percentile(&self, score: f32) -> u32 {
        let total = self.live_count();
        if total == 0 {
            return 0;
        }
        let target_bin = self.get_bin(score);
        let below: u32 = self.bins[..=target_bin].iter().map(|b| b.load(Ordering::Relaxed)).sum();
        ((below as u64 * 100) / total as u64) as u32
    }

    /// Inverse of `percentile`: the score at which `p` percent of live
    /// entries score at or below it.
    pub fn quantile(&self, p: u32) -> f32 {
        let total = self.live_count();
        if total == 0 {
            return 0.0;
        }
        let target = ((p.min(100) as u64 * total as u64) / 100) as u32;
        let mut running = 0u32;
        for (i, bin) in self.bins.iter().enumerate() {
            running += bin.load(Ordering::Relaxed);
            if running >= target {
                return (i + 1) as f32 / self.bins.len() as f32;
            }
        }
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tracks_live_entries() {
        let h = ScoreHistogram::new(10);
        h.increment(0.5);
        h.increment(0.9);
        h.decrement(0.5);
        assert_eq!(h.live_count(), 1);
    }

    #[test]
    fn quantile_roughly_inverts_percentile() {
        let h = ScoreHistogram::new(10);
        for s in [0.1, 0.2, 0.3, 0.8, 0.9] {
            h.increment(s);
        }
        let p90 = h.quantile(90);
        assert!(p90 >= 0.7);
    }
}
