//! error — typed failures surfaced by the core
//!
//! Per-frame errors (`DimensionMismatch`, `Detector`, `MissingInput`) cause the
//! frame to be dropped and logged by the caller. `PlaybackUnavailable` never
//! leaves the alert loop. Nothing here is retried.

use thiserror::Error;

use crate::detection::HazardCategory;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot allocate a {width}x{height} pixel buffer")]
    Allocation { width: u32, height: u32 },

    #[error("buffer data has {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("dimension mismatch: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("pixel access out of bounds: ({x}, {y}, channel {channel}) in {width}x{height}")]
    IndexOutOfBounds {
        x: u32,
        y: u32,
        channel: usize,
        width: u32,
        height: u32,
    },

    #[error("missing {0} input")]
    MissingInput(&'static str),

    #[error("detector failed: {0}")]
    Detector(#[source] anyhow::Error),

    #[error("cue playback unavailable for {category:?}: {reason}")]
    PlaybackUnavailable {
        category: HazardCategory,
        reason: String,
    },

    #[error("failed to spawn alert scheduler thread")]
    SchedulerSpawn(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("resize failed: {0}")]
    Resize(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
