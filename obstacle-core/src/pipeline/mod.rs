//! pipeline — per-frame path and the alert loop wired together
//!
//! [`FrameProcessor`] owns everything that runs on the frame thread. A
//! [`Pipeline`] adds the [`AlertScheduler`] that reads the processor's
//! smoothed signals on its own cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::{AlertControl, AlertScheduler, AlertStats, CuePlayer};
use crate::buffer::PixelBuffer;
use crate::config::Config;
use crate::depth::{HoleFillFilter, detect_depth_step};
use crate::detection::{DetectionBox, DetectionBoxFilter, Detector, PerCategory};
use crate::error::{CoreError, CoreResult};
use crate::fusion;
use crate::proximity::{ProximitySignals, ProximitySmoother};

/// Frames between profiling summaries.
const PROFILE_EVERY: u64 = 300;

/// Everything the frame path produces for one color/depth pair.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Color frame with repaired depth in its auxiliary channel.
    pub fused: PixelBuffer,
    /// Boxes that survived filtering, for annotation.
    pub boxes: Vec<DetectionBox>,
    pub raw: PerCategory<f64>,
    pub smoothed: PerCategory<f64>,
    /// A sharp depth rise was found in the fused depth channel.
    pub depth_step: bool,
}

pub struct FrameProcessor<D: Detector> {
    detector: D,
    hole_fill: HoleFillFilter,
    box_filter: DetectionBoxFilter,
    smoother: ProximitySmoother,
    working_size: Option<(u32, u32)>,
    prof_frames: u64,
    prof_fill: Duration,
    prof_fuse: Duration,
    prof_detect: Duration,
}

impl<D: Detector> FrameProcessor<D> {
    pub fn new(config: &Config, detector: D) -> Self {
        Self {
            detector,
            hole_fill: HoleFillFilter::new(config.hole_threshold),
            box_filter: DetectionBoxFilter::new(&config.filter),
            smoother: ProximitySmoother::new(),
            working_size: config.working_size,
            prof_frames: 0,
            prof_fill: Duration::ZERO,
            prof_fuse: Duration::ZERO,
            prof_detect: Duration::ZERO,
        }
    }

    pub fn signals(&self) -> Arc<ProximitySignals> {
        self.smoother.signals()
    }

    /// Run one frame pair through hole fill, fusion, detection, box filtering
    /// and smoothing. On any error the frame is dropped and the smoothed
    /// signals keep their previous values.
    pub fn process(&mut self, color: PixelBuffer, mut depth: PixelBuffer) -> CoreResult<FrameOutput> {
        // Holes are repaired at sensor resolution, before any rescale can
        // blend them into their valid neighbours.
        let fill_start = Instant::now();
        self.hole_fill.apply(&mut depth);
        self.prof_fill += fill_start.elapsed();

        let (color, depth) = match self.working_size {
            Some((w, h)) => {
                let color = fit(color, w, h, PixelBuffer::resized).map_err(dropped)?;
                let depth = fit(depth, w, h, PixelBuffer::resized_nearest).map_err(dropped)?;
                (color, depth)
            }
            None => (color, depth),
        };

        let fuse_start = Instant::now();
        let fused = fusion::fuse(color, &depth).map_err(dropped)?;
        let depth_step = detect_depth_step(&fused);
        self.prof_fuse += fuse_start.elapsed();

        let detect_start = Instant::now();
        let detected = self.detector.detect(&fused);
        self.prof_detect += detect_start.elapsed();
        let boxes = detected.map_err(|e| {
            tracing::warn!("detection error: {e}");
            CoreError::Detector(e)
        })?;

        let (width, height) = fused.dimensions();
        let report = self.box_filter.filter(boxes, width, height);
        let smoothed = self.smoother.update(&report.raw);

        self.prof_frames += 1;
        if self.prof_frames % PROFILE_EVERY == 0 {
            let per_frame = |d: Duration| {
                format!("{:.2}", d.as_secs_f64() * 1000.0 / self.prof_frames as f64)
            };
            tracing::info!(
                frames = self.prof_frames,
                fill_ms_per_frame = per_frame(self.prof_fill),
                fuse_ms_per_frame = per_frame(self.prof_fuse),
                detect_ms_per_frame = per_frame(self.prof_detect),
                "frame path timings"
            );
        }

        Ok(FrameOutput {
            fused,
            boxes: report.accepted,
            raw: report.raw,
            smoothed,
            depth_step,
        })
    }

    /// Entry point for capture layers that can deliver half a pair.
    pub fn process_pair(
        &mut self,
        color: Option<PixelBuffer>,
        depth: Option<PixelBuffer>,
    ) -> CoreResult<FrameOutput> {
        let (color, depth) = match (color, depth) {
            (Some(color), Some(depth)) => (color, depth),
            (None, _) => return Err(dropped(CoreError::MissingInput("color"))),
            (_, None) => return Err(dropped(CoreError::MissingInput("depth"))),
        };
        self.process(color, depth)
    }

    /// Return the smoothed signals to neutral.
    pub fn reset(&mut self) {
        self.smoother.reset();
    }
}

fn dropped(e: CoreError) -> CoreError {
    tracing::warn!("frame dropped: {e}");
    e
}

fn fit(
    buf: PixelBuffer,
    width: u32,
    height: u32,
    resize: fn(&PixelBuffer, u32, u32) -> CoreResult<PixelBuffer>,
) -> CoreResult<PixelBuffer> {
    if buf.dimensions() == (width, height) {
        Ok(buf)
    } else {
        resize(&buf, width, height)
    }
}

/// The frame path plus the alert loop reading its signals.
pub struct Pipeline<D: Detector> {
    processor: FrameProcessor<D>,
    alerts: AlertScheduler,
}

impl<D: Detector> Pipeline<D> {
    pub fn new<P: CuePlayer>(config: &Config, detector: D, player: P) -> CoreResult<Self> {
        config.validate()?;
        let processor = FrameProcessor::new(config, detector);
        let alerts = AlertScheduler::spawn(&config.alert, processor.signals(), player)?;
        Ok(Self { processor, alerts })
    }

    pub fn process(&mut self, color: PixelBuffer, depth: PixelBuffer) -> CoreResult<FrameOutput> {
        self.processor.process(color, depth)
    }

    pub fn start_alerts(&self) {
        self.alerts.start();
    }

    pub fn stop_alerts(&self) {
        self.alerts.stop();
    }

    /// Stop alerting and clear the smoothed signals; call `start_alerts` to
    /// resume.
    pub fn restart(&mut self) {
        self.alerts.stop();
        self.processor.reset();
    }

    pub fn alert_control(&self) -> AlertControl {
        self.alerts.control()
    }

    pub fn signals(&self) -> Arc<ProximitySignals> {
        self.processor.signals()
    }

    pub fn shutdown(self) -> AlertStats {
        self.alerts.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::HazardCategory;

    struct Fixed(Vec<DetectionBox>);

    impl Detector for Fixed {
        fn detect(&mut self, _frame: &PixelBuffer) -> anyhow::Result<Vec<DetectionBox>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl Detector for Failing {
        fn detect(&mut self, _frame: &PixelBuffer) -> anyhow::Result<Vec<DetectionBox>> {
            anyhow::bail!("model not loaded")
        }
    }

    fn config() -> Config {
        Config {
            working_size: None,
            ..Config::default()
        }
    }

    fn frame_pair(w: u32, h: u32, depth: u8) -> (PixelBuffer, PixelBuffer) {
        let color = PixelBuffer::from_raw(w, h, [90u8, 120, 150, 255].repeat((w * h) as usize)).unwrap();
        let depth = PixelBuffer::from_depth(w, h, &vec![depth; (w * h) as usize]).unwrap();
        (color, depth)
    }

    #[test]
    fn repairs_fuses_and_smooths() {
        let obstacle = DetectionBox {
            category: HazardCategory::Obstacle,
            confidence: 0.9,
            xmin: 0.3,
            ymin: 0.1,
            xmax: 0.7,
            ymax: 0.4,
        };
        let mut processor = FrameProcessor::new(&config(), Fixed(vec![obstacle]));
        let (color, depth) = frame_pair(8, 4, 0);

        let out = processor.process(color, depth).unwrap();
        // All-hole depth is repaired to the threshold before fusion.
        assert!(out.fused.as_bytes().chunks_exact(4).all(|px| px == [90, 120, 150, 50]));
        assert_eq!(out.boxes.len(), 1);
        assert!((out.raw[HazardCategory::Obstacle] - 0.4).abs() < 1e-6);
        assert!((out.smoothed[HazardCategory::Obstacle] - 0.4 / 3.0).abs() < 1e-6);
        assert!(!out.depth_step);
    }

    #[test]
    fn detector_failure_keeps_previous_signals() {
        let mut processor = FrameProcessor::new(&config(), Failing);
        let signals = processor.signals();
        let (color, depth) = frame_pair(4, 4, 200);
        let err = processor.process(color, depth).unwrap_err();
        assert!(matches!(err, CoreError::Detector(_)));
        assert_eq!(signals.get(HazardCategory::Obstacle), 0.0);
    }

    #[test]
    fn mismatched_pair_is_dropped_without_working_size() {
        let mut processor = FrameProcessor::new(&config(), Fixed(Vec::new()));
        let (color, _) = frame_pair(4, 4, 100);
        let (_, depth) = frame_pair(2, 2, 100);
        assert!(matches!(
            processor.process(color, depth),
            Err(CoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn half_pairs_are_dropped() {
        let mut processor = FrameProcessor::new(&config(), Fixed(Vec::new()));
        let (color, depth) = frame_pair(4, 4, 100);
        assert!(matches!(
            processor.process_pair(None, Some(depth)),
            Err(CoreError::MissingInput("color"))
        ));
        assert!(matches!(
            processor.process_pair(Some(color), None),
            Err(CoreError::MissingInput("depth"))
        ));
    }

    #[test]
    fn depth_is_repaired_before_rescale() {
        // 640x480 depth in alternating 8-column blocks of holes and 200.
        let (w, h) = (640u32, 480u32);
        let raw: Vec<u8> = (0..w * h)
            .map(|i| if (i % w / 8) % 2 == 0 { 0 } else { 200 })
            .collect();
        let depth = PixelBuffer::from_depth(w, h, &raw).unwrap();

        let mut native = depth.clone();
        HoleFillFilter::default().apply(&mut native);
        let repaired: std::collections::HashSet<u8> =
            native.as_bytes().chunks_exact(4).map(|px| px[0]).collect();

        let cfg = Config {
            working_size: Some((320, 240)),
            ..Config::default()
        };
        let mut processor = FrameProcessor::new(&cfg, Fixed(Vec::new()));
        let color = PixelBuffer::from_raw(w, h, [90u8, 120, 150, 255].repeat((w * h) as usize)).unwrap();
        let out = processor.process(color, depth).unwrap();

        assert_eq!(out.fused.dimensions(), (320, 240));
        for px in out.fused.as_bytes().chunks_exact(4) {
            // Gray depth fuses to itself, so every aux value must be one the
            // native-resolution repair produced.
            assert!(repaired.contains(&px[3]), "aux {} was never a repaired depth", px[3]);
            assert!(px[3] >= 50);
        }
    }

    #[test]
    fn working_size_normalizes_both_buffers() {
        let cfg = Config {
            working_size: Some((4, 3)),
            ..Config::default()
        };
        let mut processor = FrameProcessor::new(&cfg, Fixed(Vec::new()));
        let (color, _) = frame_pair(8, 6, 100);
        let (_, depth) = frame_pair(16, 12, 100);
        let out = processor.process(color, depth).unwrap();
        assert_eq!(out.fused.dimensions(), (4, 3));
    }
}
