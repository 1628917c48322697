//! alert — fixed-cadence audio cue scheduling
//!
//! [`AlertCycle`] is the per-tick state machine; it is pure so it can be
//! driven tick by tick. [`AlertScheduler`] runs it on a dedicated thread at
//! `cycle_time` cadence, independent of frame arrival, reading the smoothed
//! proximity cells without locking.
//!
//! The loop waits on a shutdown channel with a timeout equal to the rest of
//! the tick, so cancellation is observed once per tick and the thread is
//! always joined on shutdown or drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::config::AlertConfig;
use crate::detection::HazardCategory;
use crate::error::{CoreError, CoreResult};
use crate::proximity::ProximitySignals;

// ── Constants ────────────────────────────────────────────────────────────────

/// Smoothed proximity below which a cue is played.
pub const ALERT_THRESHOLD: f64 = 0.3;
/// Length of one scheduler tick.
pub const CYCLE_TIME: Duration = Duration::from_millis(500);
/// Edge cues are rate-limited to one per window of this length.
pub const EDGE_ALERT_EVERY: Duration = Duration::from_secs(60);

// ── Cue player ───────────────────────────────────────────────────────────────

/// The external audio device. A failed cue is logged and skipped.
pub trait CuePlayer: Send + 'static {
    fn play_cue(&mut self, category: HazardCategory) -> CoreResult<()>;
}

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cues {
    pub obstacle: bool,
    pub edge: bool,
}

impl Cues {
    pub fn any(&self) -> bool {
        self.obstacle || self.edge
    }
}

#[derive(Debug, Clone)]
pub struct AlertCycle {
    threshold: f64,
    cycle_time: Duration,
    edge_every: Duration,
    edge_elapsed: Duration,
}

impl AlertCycle {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            threshold: config.alert_threshold,
            cycle_time: config.cycle_time(),
            edge_every: config.edge_alert_every(),
            edge_elapsed: Duration::ZERO,
        }
    }

    pub fn edge_elapsed(&self) -> Duration {
        self.edge_elapsed
    }

    /// Advance one tick. While stopped the edge window still advances but no
    /// cue is issued.
    pub fn tick(&mut self, running: bool, obstacle: f64, edge: f64) -> Cues {
        if !running {
            self.edge_elapsed += self.cycle_time;
            return Cues::default();
        }

        let obstacle_cue = obstacle < self.threshold;

        if self.edge_elapsed > self.edge_every {
            self.edge_elapsed = Duration::ZERO;
        }
        let edge_cue = self.edge_elapsed.is_zero() && edge < self.threshold;
        self.edge_elapsed += self.cycle_time;

        Cues {
            obstacle: obstacle_cue,
            edge: edge_cue,
        }
    }
}

// ── Scheduler thread ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub ticks: u64,
    pub obstacle_cues: u64,
    pub edge_cues: u64,
    pub playback_failures: u64,
}

/// Cloneable start/stop switch for the scheduler.
#[derive(Debug, Clone)]
pub struct AlertControl(Arc<AtomicBool>);

impl AlertControl {
    pub fn start(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct AlertScheduler {
    control: AlertControl,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<AlertStats>>,
}

impl AlertScheduler {
    /// Spawn the alert loop in the `Stopped` state.
    pub fn spawn<P: CuePlayer>(
        config: &AlertConfig,
        signals: Arc<ProximitySignals>,
        player: P,
    ) -> CoreResult<Self> {
        let control = AlertControl(Arc::new(AtomicBool::new(false)));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let cycle = AlertCycle::new(config);
        let running = control.clone();
        let handle = thread::Builder::new()
            .name("alert-scheduler".into())
            .spawn(move || run_loop(cycle, running, signals, player, shutdown_rx))
            .map_err(CoreError::SchedulerSpawn)?;

        info!(
            cycle_ms = config.cycle_time_ms,
            edge_every_ms = config.edge_alert_every_ms,
            threshold = config.alert_threshold,
            "alert scheduler spawned"
        );

        Ok(Self {
            control,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn start(&self) {
        self.control.start();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn control(&self) -> AlertControl {
        self.control.clone()
    }

    /// Cancel the loop, join its thread and return what it did.
    pub fn shutdown(mut self) -> AlertStats {
        self.join()
    }

    fn join(&mut self) -> AlertStats {
        // Dropping the sender disconnects the channel, which the loop treats
        // as cancellation.
        self.shutdown_tx.take();
        let Some(handle) = self.handle.take() else {
            return AlertStats::default();
        };
        match handle.join() {
            Ok(stats) => {
                info!(
                    ticks = stats.ticks,
                    obstacle_cues = stats.obstacle_cues,
                    edge_cues = stats.edge_cues,
                    playback_failures = stats.playback_failures,
                    "alert scheduler stopped"
                );
                stats
            }
            Err(_) => {
                error!("alert scheduler thread panicked");
                AlertStats::default()
            }
        }
    }
}

impl Drop for AlertScheduler {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_loop<P: CuePlayer>(
    mut cycle: AlertCycle,
    control: AlertControl,
    signals: Arc<ProximitySignals>,
    mut player: P,
    shutdown_rx: crossbeam_channel::Receiver<()>,
) -> AlertStats {
    let mut stats = AlertStats::default();
    let cycle_time = cycle.cycle_time;

    loop {
        let tick_start = Instant::now();

        let cues = cycle.tick(
            control.is_running(),
            signals.get(HazardCategory::Obstacle),
            signals.get(HazardCategory::Edge),
        );
        stats.ticks += 1;

        if cues.obstacle {
            play(&mut player, HazardCategory::Obstacle, &mut stats);
            stats.obstacle_cues += 1;
        }
        if cues.edge {
            play(&mut player, HazardCategory::Edge, &mut stats);
            stats.edge_cues += 1;
        }

        let remaining = cycle_time.saturating_sub(tick_start.elapsed());
        match shutdown_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    stats
}

fn play<P: CuePlayer>(player: &mut P, category: HazardCategory, stats: &mut AlertStats) {
    match player.play_cue(category) {
        Ok(()) => debug!(category = category.label(), "cue played"),
        Err(e) => {
            stats.playback_failures += 1;
            warn!(category = category.label(), "cue skipped: {e}");
        }
    }
}
