//! Named, lock-free event meters.
//!
//! The buffer only ever marks meters; reading them (dashboards, periodic
//! reporters) is up to whoever owns the [`MetricRegistry`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Instant;

/// Counts events and derives a mean rate since creation.
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    created: Instant,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            created: Instant::now(),
        }
    }
}

impl Meter {
    #[inline]
    pub fn mark(&self, n: u64) {
        self.count.fetch_add(n, Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    /// Events per second since the meter was created.
    pub fn mean_rate(&self) -> f64 {
        let elapsed = self.created.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

/// Registry handing out shared meters by name.
///
/// Meters are created on first request; later requests for the same name get
/// the same meter.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    meters: Mutex<HashMap<String, Arc<Meter>>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meter(&self, name: &str) -> Arc<Meter> {
        let mut meters = self.meters.lock();
        if let Some(meter) = meters.get(name) {
            return meter.clone();
        }
        let meter = Arc::new(Meter::default());
        meters.insert(name.to_string(), meter.clone());
        meter
    }

    /// Current counts of every registered meter, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let meters = self.meters.lock();
        let mut counts: Vec<(String, u64)> = meters
            .iter()
            .map(|(name, meter)| (name.clone(), meter.count()))
            .collect();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        counts
    }
}

/// Joins a prefix and name parts with `.`, skipping empty parts.
pub fn metric_name(prefix: &str, parts: &[&str]) -> String {
    std::iter::once(prefix)
        .chain(parts.iter().copied())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}
