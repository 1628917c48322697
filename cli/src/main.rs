use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use obstacle_core::{
    Config, CoreResult, CuePlayer, DetectionBox, Detector, HazardCategory, PixelBuffer, Pipeline,
    depth::{HOLE_THRESHOLD, HoleFillFilter},
    fusion,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "obstacle-aid",
    version,
    about = "Depth-assisted obstacle alerts for walking aids",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair missing readings in a grayscale depth map.
    Fill {
        /// Depth map (grayscale PNG)
        #[arg(short, long)]
        depth: PathBuf,

        /// Output depth map path
        #[arg(short, long, default_value = "filled.png")]
        output: PathBuf,

        /// Readings below this value are treated as holes
        #[arg(long, default_value_t = HOLE_THRESHOLD)]
        threshold: u8,
    },

    /// Hole-fill a depth map and pack it into a color frame's alpha channel.
    Fuse {
        /// Color frame
        #[arg(short, long)]
        color: PathBuf,

        /// Depth map (grayscale PNG)
        #[arg(short, long)]
        depth: PathBuf,

        /// Output RGBA path
        #[arg(short, long, default_value = "fused.png")]
        output: PathBuf,
    },

    /// Replay recorded frames through the full pipeline with alerts running.
    Replay {
        /// Directory of NNNN_color.png / NNNN_depth.png / NNNN_boxes.json
        #[arg(short, long)]
        frames: PathBuf,

        /// Playback rate
        #[arg(long, default_value_t = 10.0)]
        fps: f64,

        /// YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the detector confidence threshold (0–1)
        #[arg(long)]
        confidence: Option<f32>,

        /// Override the alert threshold (0–1)
        #[arg(long)]
        alert_threshold: Option<f64>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fill {
            depth,
            output,
            threshold,
        } => cmd_fill(depth, output, threshold),
        Commands::Fuse {
            color,
            depth,
            output,
        } => cmd_fuse(color, depth, output),
        Commands::Replay {
            frames,
            fps,
            config,
            confidence,
            alert_threshold,
        } => cmd_replay(frames, fps, config, confidence, alert_threshold),
    }
}

// ── fill ──────────────────────────────────────────────────────────────────────

fn cmd_fill(depth: PathBuf, output: PathBuf, threshold: u8) -> Result<()> {
    info!("hole fill");
    info!("  depth  : {}", depth.display());
    info!("  output : {}", output.display());

    let mut buf = load_depth(&depth)?;
    let repaired = HoleFillFilter::new(threshold).apply(&mut buf);
    info!(repaired, "depth holes filled");

    let img = buf.into_rgba_image()?;
    DynamicImage::ImageRgba8(img)
        .to_luma8()
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

// ── fuse ──────────────────────────────────────────────────────────────────────

fn cmd_fuse(color: PathBuf, depth: PathBuf, output: PathBuf) -> Result<()> {
    info!("fuse");
    info!("  color  : {}", color.display());
    info!("  depth  : {}", depth.display());
    info!("  output : {}", output.display());

    let color = load_color(&color)?;
    let mut depth = load_depth(&depth)?;
    HoleFillFilter::default().apply(&mut depth);
    if depth.dimensions() != color.dimensions() {
        let (w, h) = color.dimensions();
        depth = depth.resized_nearest(w, h)?;
    }

    let fused = fusion::fuse(color, &depth)?;
    fused
        .into_rgba_image()?
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

// ── replay ────────────────────────────────────────────────────────────────────

fn cmd_replay(
    frames: PathBuf,
    fps: f64,
    config: Option<PathBuf>,
    confidence: Option<f32>,
    alert_threshold: Option<f64>,
) -> Result<()> {
    let frame_time = frame_interval(fps)?;

    let mut config = match config {
        Some(path) => Config::load(&path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(c) = confidence {
        config.filter.confidence_threshold = c;
    }
    if let Some(a) = alert_threshold {
        config.alert.alert_threshold = a;
    }

    let triples = list_frames(&frames)?;
    anyhow::ensure!(!triples.is_empty(), "no *_color.png frames in {}", frames.display());
    info!("replay");
    info!("  frames : {} ({} pairs)", frames.display(), triples.len());
    info!("  fps    : {fps}");

    let slot = Arc::new(Mutex::new(None));
    let detector = BoxFileDetector {
        next: Arc::clone(&slot),
    };
    let mut pipeline = Pipeline::new(&config, detector, LogCuePlayer)?;
    pipeline.start_alerts();

    let pb = spinner("Replaying frames…");
    let mut dropped = 0usize;
    let mut depth_steps = 0usize;

    for frame in &triples {
        let started = Instant::now();
        pb.tick();

        let color = load_color(&frame.color)?;
        let depth = load_depth(&frame.depth)?;
        *slot.lock().map_err(|_| anyhow::anyhow!("box slot poisoned"))? = frame.boxes.clone();

        match pipeline.process(color, depth) {
            Ok(out) => {
                depth_steps += usize::from(out.depth_step);
                debug!(
                    frame = %frame.stem,
                    boxes = out.boxes.len(),
                    obstacle = out.smoothed[HazardCategory::Obstacle],
                    edge = out.smoothed[HazardCategory::Edge],
                    depth_step = out.depth_step,
                    "frame processed"
                );
            }
            Err(e) => {
                dropped += 1;
                debug!(frame = %frame.stem, "frame dropped: {e}");
            }
        }

        if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    pipeline.stop_alerts();
    let stats = pipeline.shutdown();
    pb.finish_with_message("Replay done.");
    info!(
        frames = triples.len(),
        dropped,
        depth_steps,
        ticks = stats.ticks,
        obstacle_cues = stats.obstacle_cues,
        edge_cues = stats.edge_cues,
        "replay summary"
    );
    Ok(())
}

struct FrameFiles {
    stem: String,
    color: PathBuf,
    depth: PathBuf,
    boxes: Option<PathBuf>,
}

/// Collect `NNNN_color.png` frames that have a matching depth map, in name
/// order.
fn list_frames(dir: &Path) -> Result<Vec<FrameFiles>> {
    let mut stems = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let name = entry?.file_name();
        if let Some(stem) = name.to_str().and_then(|n| n.strip_suffix("_color.png")) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();

    let mut frames = Vec::with_capacity(stems.len());
    for stem in stems {
        let depth = dir.join(format!("{stem}_depth.png"));
        if !depth.is_file() {
            tracing::warn!("{stem}: no depth map, skipping");
            continue;
        }
        let boxes = dir.join(format!("{stem}_boxes.json"));
        frames.push(FrameFiles {
            color: dir.join(format!("{stem}_color.png")),
            depth,
            boxes: boxes.is_file().then_some(boxes),
            stem,
        });
    }
    Ok(frames)
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Detector backed by recorded JSON box files. A frame with no file, or an
/// unreadable one, is a detection failure.
struct BoxFileDetector {
    next: Arc<Mutex<Option<PathBuf>>>,
}

impl Detector for BoxFileDetector {
    fn detect(&mut self, _frame: &PixelBuffer) -> Result<Vec<DetectionBox>> {
        let path = self
            .next
            .lock()
            .map_err(|_| anyhow::anyhow!("box slot poisoned"))?
            .take()
            .context("no recorded boxes for this frame")?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("malformed boxes: {}", path.display()))
    }
}

/// Stands in for the audio device by logging each cue.
struct LogCuePlayer;

impl CuePlayer for LogCuePlayer {
    fn play_cue(&mut self, category: HazardCategory) -> CoreResult<()> {
        info!("cue: {}", category.label());
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_color(path: &Path) -> Result<PixelBuffer> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(PixelBuffer::from_rgba_image(img.to_rgba8())?)
}

fn load_depth(path: &Path) -> Result<PixelBuffer> {
    let img = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .to_luma8();
    let (w, h) = img.dimensions();
    Ok(PixelBuffer::from_depth(w, h, img.as_raw())?)
}

/// Wall-clock budget for one frame at `fps`.
fn frame_interval(fps: f64) -> Result<Duration> {
    anyhow::ensure!(fps > 0.0, "--fps must be positive");
    Duration::try_from_secs_f64(1.0 / fps).with_context(|| format!("--fps {fps} is too small"))
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
