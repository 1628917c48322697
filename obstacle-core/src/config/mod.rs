//! config — tunables for the frame path and the alert loop
//!
//! Every field defaults to the constants used throughout the crate, so an
//! empty YAML document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert::{ALERT_THRESHOLD, CYCLE_TIME, EDGE_ALERT_EVERY};
use crate::buffer::{WORKING_HEIGHT, WORKING_WIDTH};
use crate::depth::HOLE_THRESHOLD;
use crate::detection::{CONFIDENCE_THRESHOLD, IOU_REJECT_THRESHOLD};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hole_threshold: u8,
    /// Both buffers of a pair are rescaled to this size, depth after hole fill.
    /// `None` keeps input sizes and drops mismatched pairs.
    pub working_size: Option<(u32, u32)>,
    pub filter: FilterConfig,
    pub alert: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hole_threshold: HOLE_THRESHOLD,
            working_size: Some((WORKING_WIDTH, WORKING_HEIGHT)),
            filter: FilterConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub confidence_threshold: f32,
    pub iou_reject_threshold: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            iou_reject_threshold: IOU_REJECT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub alert_threshold: f64,
    pub cycle_time_ms: u64,
    pub edge_alert_every_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_threshold: ALERT_THRESHOLD,
            cycle_time_ms: CYCLE_TIME.as_millis() as u64,
            edge_alert_every_ms: EDGE_ALERT_EVERY.as_millis() as u64,
        }
    }
}

impl AlertConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    pub fn edge_alert_every(&self) -> Duration {
        Duration::from_millis(self.edge_alert_every_ms)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> CoreResult<Self> {
        let config: Config =
            serde_yaml::from_str(contents).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let unit = 0.0f32..=1.0;
        if !unit.contains(&self.filter.confidence_threshold) {
            return Err(CoreError::Config(format!(
                "confidence_threshold {} outside [0, 1]",
                self.filter.confidence_threshold
            )));
        }
        if !unit.contains(&self.filter.iou_reject_threshold) {
            return Err(CoreError::Config(format!(
                "iou_reject_threshold {} outside [0, 1]",
                self.filter.iou_reject_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.alert.alert_threshold) {
            return Err(CoreError::Config(format!(
                "alert_threshold {} outside [0, 1]",
                self.alert.alert_threshold
            )));
        }
        if self.alert.cycle_time_ms == 0 {
            return Err(CoreError::Config("cycle_time_ms must be positive".into()));
        }
        if let Some((w, h)) = self.working_size {
            if w == 0 || h == 0 {
                return Err(CoreError::Config(format!("working_size {w}x{h} is empty")));
            }
        }
        Ok(())
    }
}
