//! detection — hazard boxes and the per-frame box filter
//!
//! The object detector itself is an external collaborator behind the
//! [`Detector`] trait. It reports boxes normalized to `[0, 1]` with the
//! vertical origin at the *bottom* of the frame. [`DetectionBoxFilter`] drops
//! noise boxes and reduces the survivors to one raw proximity scalar per
//! hazard category.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::PixelBuffer;
use crate::config::FilterConfig;

// ── Constants ────────────────────────────────────────────────────────────────

/// Minimum detector confidence for a box to be considered.
pub const CONFIDENCE_THRESHOLD: f32 = 0.2;
/// Boxes covering more than this fraction of the frame are false positives.
pub const IOU_REJECT_THRESHOLD: f32 = 0.8;
/// Minimum top-origin vertical position before any box is seen.
const Y_TOP_SENTINEL: f32 = 1.0;

// ── Categories ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardCategory {
    Obstacle,
    Pothole,
    Edge,
    Uplift,
}

impl HazardCategory {
    pub const ALL: [HazardCategory; 4] = [Self::Obstacle, Self::Pothole, Self::Edge, Self::Uplift];

    pub fn index(self) -> usize {
        match self {
            Self::Obstacle => 0,
            Self::Pothole => 1,
            Self::Edge => 2,
            Self::Uplift => 3,
        }
    }

    /// Map the detector's integer class output to a category.
    pub fn from_class_index(class: usize) -> Option<Self> {
        Self::ALL.get(class).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Obstacle => "Obstacle",
            Self::Pothole => "Pothole",
            Self::Edge => "Edge",
            Self::Uplift => "Uplift",
        }
    }
}

/// One value per hazard category, indexed by [`HazardCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerCategory<T>([T; 4]);

impl<T: Copy> PerCategory<T> {
    pub fn splat(value: T) -> Self {
        Self([value; 4])
    }

    pub fn iter(&self) -> impl Iterator<Item = (HazardCategory, T)> + '_ {
        HazardCategory::ALL.iter().map(move |&c| (c, self.0[c.index()]))
    }
}

impl<T> Index<HazardCategory> for PerCategory<T> {
    type Output = T;

    fn index(&self, category: HazardCategory) -> &T {
        &self.0[category.index()]
    }
}

impl<T> IndexMut<HazardCategory> for PerCategory<T> {
    fn index_mut(&mut self, category: HazardCategory) -> &mut T {
        &mut self.0[category.index()]
    }
}

// ── Boxes ────────────────────────────────────────────────────────────────────

/// A labeled box from the detector, normalized to `[0, 1]`, bottom origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub category: HazardCategory,
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl DetectionBox {
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Vertical position of the box's upper edge measured from the top of the
    /// frame.
    pub fn y_top(&self) -> f32 {
        (1.0 - self.ymax).clamp(0.0, 1.0)
    }
}

/// The external object detector. Given one frame, returns zero or more boxes.
pub trait Detector: Send {
    fn detect(&mut self, frame: &PixelBuffer) -> anyhow::Result<Vec<DetectionBox>>;
}

// ── Filter ───────────────────────────────────────────────────────────────────

/// Why a box was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    LowConfidence,
    Oversized,
    OffCenter,
}

/// Output of filtering one frame's boxes.
#[derive(Debug, Clone, Default)]
pub struct ProximityReport {
    /// `1 - min(y_top)` per category; 0 when nothing survived.
    pub raw: PerCategory<f64>,
    /// Boxes that passed every check, in detector order.
    pub accepted: Vec<DetectionBox>,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionBoxFilter {
    confidence_threshold: f32,
    iou_reject_threshold: f32,
}

impl Default for DetectionBoxFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

impl DetectionBoxFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            iou_reject_threshold: config.iou_reject_threshold,
        }
    }

    /// Apply the rejection rules, in order, to a single box.
    pub fn screen(
        &self,
        bbox: &DetectionBox,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<(), Rejection> {
        // Written negated so a NaN confidence is rejected too.
        if !(bbox.confidence >= self.confidence_threshold) {
            return Err(Rejection::LowConfidence);
        }

        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let frame_area = fw * fh;
        let box_area = (bbox.width() * fw) * (bbox.height() * fh);
        if frame_area <= 0.0 || box_area / frame_area > self.iou_reject_threshold {
            return Err(Rejection::Oversized);
        }

        let center_x = fw / 2.0;
        if !(bbox.xmin * fw < center_x && center_x < bbox.xmax * fw) {
            return Err(Rejection::OffCenter);
        }

        Ok(())
    }

    /// Reduce one frame's boxes to per-category raw proximity.
    pub fn filter(
        &self,
        boxes: Vec<DetectionBox>,
        frame_width: u32,
        frame_height: u32,
    ) -> ProximityReport {
        let mut min_y_top = PerCategory::splat(Y_TOP_SENTINEL);
        let mut accepted = Vec::with_capacity(boxes.len());
        let mut rejected = 0;

        for bbox in boxes {
            match self.screen(&bbox, frame_width, frame_height) {
                Ok(()) => {
                    let slot = &mut min_y_top[bbox.category];
                    *slot = slot.min(bbox.y_top());
                    accepted.push(bbox);
                }
                Err(reason) => {
                    debug!(
                        category = bbox.category.label(),
                        confidence = bbox.confidence,
                        ?reason,
                        "box rejected"
                    );
                    rejected += 1;
                }
            }
        }

        let mut raw = PerCategory::splat(0.0f64);
        for (category, y) in min_y_top.iter() {
            raw[category] = 1.0 - y as f64;
        }

        ProximityReport {
            raw,
            accepted,
            rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centered(category: HazardCategory, confidence: f32, ymin: f32, ymax: f32) -> DetectionBox {
        DetectionBox {
            category,
            confidence,
            xmin: 0.4,
            ymin,
            xmax: 0.6,
            ymax,
        }
    }

    #[test]
    fn class_index_round_trip() {
        for c in HazardCategory::ALL {
            assert_eq!(HazardCategory::from_class_index(c.index()), Some(c));
        }
        assert_eq!(HazardCategory::from_class_index(4), None);
        assert_eq!(HazardCategory::Edge.label(), "Edge");
    }

    #[test]
    fn low_confidence_never_counts() {
        let filter = DetectionBoxFilter::default();
        for category in HazardCategory::ALL {
            for (w, h) in [(320, 240), (1, 1), (1920, 1080), (7, 3000)] {
                let report = filter.filter(vec![centered(category, 0.15, 0.2, 0.5)], w, h);
                assert!(report.accepted.is_empty());
                assert_eq!(report.rejected, 1);
                assert!(report.raw.iter().all(|(_, v)| v == 0.0));
            }
        }
    }

    #[test]
    fn nan_confidence_is_rejected() {
        let filter = DetectionBoxFilter::default();
        let bbox = centered(HazardCategory::Obstacle, f32::NAN, 0.1, 0.5);
        assert_eq!(filter.screen(&bbox, 320, 240), Err(Rejection::LowConfidence));
        let report = filter.filter(vec![bbox], 320, 240);
        assert!(report.accepted.is_empty());
        assert_eq!(report.raw[HazardCategory::Obstacle], 0.0);
    }

    #[test]
    fn oversized_box_rejected_at_any_confidence() {
        let filter = DetectionBoxFilter::default();
        let big = DetectionBox {
            category: HazardCategory::Obstacle,
            confidence: 0.0,
            xmin: 0.05,
            ymin: 0.0,
            xmax: 0.95,
            ymax: 1.0,
        };
        for step in 0..=10 {
            let bbox = DetectionBox {
                confidence: step as f32 / 10.0,
                ..big
            };
            assert!(filter.screen(&bbox, 320, 240).is_err());
        }
        let bbox = DetectionBox {
            confidence: 1.0,
            ..big
        };
        assert_eq!(filter.screen(&bbox, 320, 240), Err(Rejection::Oversized));
    }

    #[test]
    fn off_center_box_rejected() {
        let filter = DetectionBoxFilter::default();
        let left = DetectionBox {
            category: HazardCategory::Obstacle,
            confidence: 0.9,
            xmin: 0.1,
            ymin: 0.1,
            xmax: 0.5,
            ymax: 0.3,
        };
        assert_eq!(filter.screen(&left, 320, 240), Err(Rejection::OffCenter));
        let right = DetectionBox {
            xmin: 0.51,
            xmax: 0.9,
            ..left
        };
        assert_eq!(filter.screen(&right, 320, 240), Err(Rejection::OffCenter));
    }

    #[test]
    fn keeps_highest_box_per_category() {
        let filter = DetectionBoxFilter::default();
        let boxes = vec![
            centered(HazardCategory::Obstacle, 0.9, 0.1, 0.3),
            centered(HazardCategory::Obstacle, 0.5, 0.2, 0.7),
            centered(HazardCategory::Edge, 0.6, 0.0, 0.2),
        ];
        let report = filter.filter(boxes, 320, 240);
        assert_eq!(report.accepted.len(), 3);
        // y_top = 1 - ymax; smallest y_top for obstacles is 0.3 -> raw 0.7.
        assert!((report.raw[HazardCategory::Obstacle] - 0.7).abs() < 1e-6);
        assert!((report.raw[HazardCategory::Edge] - 0.2).abs() < 1e-6);
        assert_eq!(report.raw[HazardCategory::Pothole], 0.0);
        assert_eq!(report.raw[HazardCategory::Uplift], 0.0);
    }

    #[test]
    fn custom_thresholds_apply() {
        let filter = DetectionBoxFilter::new(&FilterConfig {
            confidence_threshold: 0.5,
            iou_reject_threshold: 0.01,
        });
        let bbox = centered(HazardCategory::Obstacle, 0.4, 0.1, 0.3);
        assert_eq!(filter.screen(&bbox, 100, 100), Err(Rejection::LowConfidence));
        let bbox = centered(HazardCategory::Obstacle, 0.6, 0.1, 0.3);
        assert_eq!(filter.screen(&bbox, 100, 100), Err(Rejection::Oversized));
    }

    #[test]
    fn box_deserializes_with_lowercase_category() {
        let bbox: DetectionBox = serde_yaml::from_str(
            "category: edge\nconfidence: 0.8\nxmin: 0.1\nymin: 0.0\nxmax: 0.9\nymax: 0.25\n",
        )
        .unwrap();
        assert_eq!(bbox.category, HazardCategory::Edge);
        assert!((bbox.y_top() - 0.75).abs() < 1e-6);
    }
}
