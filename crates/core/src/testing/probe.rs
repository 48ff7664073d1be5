//! Concurrency probe for asserting admission limits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks how many callers are inside a section and the peak seen.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    entries: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark entry into the section. The section ends when the guard drops.
    pub fn enter(&self) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            current: Arc::clone(&self.current),
        }
    }

    /// Callers inside the section right now.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous callers observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total entries so far.
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

/// Leaves the probed section on drop, including on cancellation or panic.
#[derive(Debug)]
pub struct ProbeGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_nesting() {
        let probe = ConcurrencyProbe::new();
        let a = probe.enter();
        let b = probe.enter();
        assert_eq!(probe.current(), 2);
        drop(a);
        let _c = probe.enter();
        assert_eq!(probe.peak(), 2);
        drop(b);
        assert_eq!(probe.current(), 1);
        assert_eq!(probe.entries(), 3);
    }
}
