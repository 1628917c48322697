pub mod alert;
pub mod buffer;
pub mod config;
pub mod depth;
pub mod detection;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod proximity;

pub use alert::{AlertControl, AlertScheduler, AlertStats, CuePlayer};
pub use buffer::PixelBuffer;
pub use config::Config;
pub use detection::{DetectionBox, Detector, HazardCategory, PerCategory};
pub use error::{CoreError, CoreResult};
pub use pipeline::{FrameOutput, FrameProcessor, Pipeline};
