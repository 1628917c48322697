use std::sync::{Arc, Mutex};
use std::time::Duration;

use obstacle_core::config::AlertConfig;
use obstacle_core::{
    Config, CoreError, CoreResult, CuePlayer, DetectionBox, Detector, HazardCategory, PixelBuffer,
    Pipeline,
};

/// Replays a fixed script of detector results, one per frame.
struct Scripted(Vec<anyhow::Result<Vec<DetectionBox>>>);

impl Detector for Scripted {
    fn detect(&mut self, _frame: &PixelBuffer) -> anyhow::Result<Vec<DetectionBox>> {
        if self.0.is_empty() {
            return Ok(Vec::new());
        }
        self.0.remove(0)
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<HazardCategory>>>);

impl CuePlayer for Recorder {
    fn play_cue(&mut self, category: HazardCategory) -> CoreResult<()> {
        self.0.lock().unwrap().push(category);
        Ok(())
    }
}

fn fast_config() -> Config {
    Config {
        working_size: Some((32, 24)),
        alert: AlertConfig {
            cycle_time_ms: 2,
            ..AlertConfig::default()
        },
        ..Config::default()
    }
}

fn frame(width: u32, height: u32) -> (PixelBuffer, PixelBuffer) {
    let n = (width * height) as usize;
    let color = PixelBuffer::from_raw(width, height, [10u8, 200, 30, 255].repeat(n)).unwrap();
    // Left half missing, right half at 180.
    let depth: Vec<u8> = (0..n)
        .map(|i| if (i as u32 % width) < width / 2 { 0 } else { 180 })
        .collect();
    let depth = PixelBuffer::from_depth(width, height, &depth).unwrap();
    (color, depth)
}

fn obstacle(ymax: f32) -> DetectionBox {
    DetectionBox {
        category: HazardCategory::Obstacle,
        confidence: 0.8,
        xmin: 0.35,
        ymin: 0.05,
        xmax: 0.65,
        ymax,
    }
}

#[test]
fn frames_flow_through_to_shared_signals() {
    let script = vec![Ok(vec![obstacle(0.6)]), Ok(vec![obstacle(0.6)])];
    let mut pipeline = Pipeline::new(&fast_config(), Scripted(script), Recorder::default()).unwrap();
    let signals = pipeline.signals();

    for expected in [0.6 / 3.0, 0.6 * 5.0 / 9.0] {
        let (color, depth) = frame(64, 48);
        let out = pipeline.process(color, depth).unwrap();
        assert_eq!(out.fused.dimensions(), (32, 24));
        // Every hole was repaired before fusion.
        assert!(out.fused.as_bytes().chunks_exact(4).all(|px| px[3] >= 50));
        assert!((signals.get(HazardCategory::Obstacle) - expected).abs() < 1e-5);
    }
    assert_eq!(signals.get(HazardCategory::Edge), 0.0);
    pipeline.shutdown();
}

#[test]
fn detector_failure_drops_frame_and_keeps_signals() {
    let script = vec![
        Ok(vec![obstacle(0.9)]),
        Err(anyhow::anyhow!("inference timed out")),
    ];
    let mut pipeline = Pipeline::new(&fast_config(), Scripted(script), Recorder::default()).unwrap();
    let signals = pipeline.signals();

    let (color, depth) = frame(32, 24);
    pipeline.process(color, depth).unwrap();
    let before = signals.snapshot();

    let (color, depth) = frame(32, 24);
    let err = pipeline.process(color, depth).unwrap_err();
    assert!(matches!(err, CoreError::Detector(_)));
    assert_eq!(signals.snapshot(), before);
    pipeline.shutdown();
}

#[test]
fn mismatched_sizes_without_working_size_are_dropped() {
    let config = Config {
        working_size: None,
        ..fast_config()
    };
    let mut pipeline = Pipeline::new(&config, Scripted(Vec::new()), Recorder::default()).unwrap();
    let (color, _) = frame(32, 24);
    let (_, depth) = frame(16, 12);
    assert!(matches!(
        pipeline.process(color, depth),
        Err(CoreError::DimensionMismatch { .. })
    ));
    pipeline.shutdown();
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = fast_config();
    config.filter.confidence_threshold = 2.0;
    assert!(matches!(
        Pipeline::new(&config, Scripted(Vec::new()), Recorder::default()),
        Err(CoreError::Config(_))
    ));
}

#[test]
fn scheduler_cues_only_while_started() {
    let recorder = Recorder::default();
    let played = Arc::clone(&recorder.0);
    let mut pipeline = Pipeline::new(&fast_config(), Scripted(Vec::new()), recorder).unwrap();

    // Signals sit at the neutral 0.0, which is below the alert threshold.
    std::thread::sleep(Duration::from_millis(30));
    assert!(played.lock().unwrap().is_empty());

    pipeline.start_alerts();
    std::thread::sleep(Duration::from_millis(50));
    pipeline.stop_alerts();
    let stats = pipeline.shutdown();

    let played = played.lock().unwrap();
    assert!(stats.obstacle_cues > 0);
    assert!(stats.edge_cues <= 1);
    assert_eq!(played.len() as u64, stats.obstacle_cues + stats.edge_cues);
    assert!(played.contains(&HazardCategory::Obstacle));
}

#[test]
fn restart_returns_signals_to_neutral() {
    let script = vec![Ok(vec![obstacle(0.9)])];
    let mut pipeline = Pipeline::new(&fast_config(), Scripted(script), Recorder::default()).unwrap();
    let control = pipeline.alert_control();
    pipeline.start_alerts();

    let (color, depth) = frame(32, 24);
    pipeline.process(color, depth).unwrap();
    assert!(pipeline.signals().get(HazardCategory::Obstacle) > 0.0);

    pipeline.restart();
    assert!(!control.is_running());
    assert_eq!(pipeline.signals().get(HazardCategory::Obstacle), 0.0);
    pipeline.shutdown();
}

#[test]
fn dropping_the_pipeline_joins_the_scheduler() {
    let recorder = Recorder::default();
    let played = Arc::clone(&recorder.0);
    let pipeline = Pipeline::new(&fast_config(), Scripted(Vec::new()), recorder).unwrap();
    pipeline.start_alerts();
    std::thread::sleep(Duration::from_millis(10));
    drop(pipeline);
    // The player moved into the scheduler thread is gone once it is joined.
    assert_eq!(Arc::strong_count(&played), 1);
}
