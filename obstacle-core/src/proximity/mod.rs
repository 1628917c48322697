//! proximity — per-category smoothing and the lock-free hand-off to the
//! alert loop
//!
//! Raw per-frame proximity is noisy, so each category keeps an exponential
//! decay: `next = (2 * current + raw) / 3`. The smoothed values live in
//! [`ProximitySignals`], a set of atomic `f64` cells shared with the alert
//! scheduler. The frame thread (through [`ProximitySmoother`]) is the only
//! writer; readers may observe a value up to one tick stale.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::detection::{HazardCategory, PerCategory};

/// Value every signal starts from and returns to on reset.
pub const NEUTRAL_PROXIMITY: f64 = 0.0;

/// One decay step: previous value weighted 2/3, new sample 1/3.
pub fn decay(current: f64, raw: f64) -> f64 {
    (2.0 * current + raw) / 3.0
}

/// An `f64` stored as its bit pattern so loads and stores are single-word.
#[derive(Debug)]
pub struct ProximityCell(AtomicU64);

impl ProximityCell {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Smoothed proximity per hazard category.
#[derive(Debug)]
pub struct ProximitySignals {
    cells: [ProximityCell; 4],
}

impl Default for ProximitySignals {
    fn default() -> Self {
        Self {
            cells: std::array::from_fn(|_| ProximityCell::new(NEUTRAL_PROXIMITY)),
        }
    }
}

impl ProximitySignals {
    pub fn get(&self, category: HazardCategory) -> f64 {
        self.cells[category.index()].load()
    }

    pub fn snapshot(&self) -> PerCategory<f64> {
        let mut out = PerCategory::splat(NEUTRAL_PROXIMITY);
        for c in HazardCategory::ALL {
            out[c] = self.get(c);
        }
        out
    }

    fn set(&self, category: HazardCategory, value: f64) {
        self.cells[category.index()].store(value);
    }
}

/// Sole writer of a [`ProximitySignals`] set.
#[derive(Debug)]
pub struct ProximitySmoother {
    signals: Arc<ProximitySignals>,
}

impl Default for ProximitySmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximitySmoother {
    pub fn new() -> Self {
        Self {
            signals: Arc::new(ProximitySignals::default()),
        }
    }

    /// Shared read handle for the alert loop and UI consumers.
    pub fn signals(&self) -> Arc<ProximitySignals> {
        Arc::clone(&self.signals)
    }

    /// Fold one frame's raw proximity into every category and return the new
    /// smoothed values.
    pub fn update(&mut self, raw: &PerCategory<f64>) -> PerCategory<f64> {
        let mut smoothed = PerCategory::splat(NEUTRAL_PROXIMITY);
        for (category, sample) in raw.iter() {
            let next = decay(self.signals.get(category), sample);
            self.signals.set(category, next);
            smoothed[category] = next;
        }
        debug!(
            obstacle = smoothed[HazardCategory::Obstacle],
            edge = smoothed[HazardCategory::Edge],
            "proximity smoothed"
        );
        smoothed
    }

    /// Return every signal to the neutral value. Only used on an explicit
    /// restart; the smoother otherwise keeps state for its whole lifetime.
    pub fn reset(&mut self) {
        for c in HazardCategory::ALL {
            self.signals.set(c, NEUTRAL_PROXIMITY);
        }
    }
}
