//! depth — in-place repair and inspection of depth maps
//!
//! The sensor writes a value below `HOLE_THRESHOLD` for out-of-range or
//! low-confidence depth. `HoleFillFilter` walks each row left to right and
//! bridges every such run ("hole") by linear interpolation between its valid
//! neighbours, then blends each bridged pixel with the already-repaired pixel
//! directly above it to suppress horizontal banding.
//!
//! Depth is read from channel 0 and written to all three color channels; the
//! auxiliary channel is never touched.

use tracing::debug;

use crate::buffer::{AUX_CHANNEL, CHANNELS, PixelBuffer};

// ── Constants ────────────────────────────────────────────────────────────────

/// Depth values below this are holes.
pub const HOLE_THRESHOLD: u8 = 50;
/// Column distance between the two samples compared by the depth-step check.
pub const NEXT_PIXEL_INTERVAL: usize = 10;
/// Minimum depth rise across `NEXT_PIXEL_INTERVAL` columns that counts as an
/// obstacle edge.
pub const OBSTACLE_DIFF_THRESHOLD: i32 = 100;

// ── Hole filling ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct HoleFillFilter {
    threshold: u8,
}

impl Default for HoleFillFilter {
    fn default() -> Self {
        Self::new(HOLE_THRESHOLD)
    }
}

impl HoleFillFilter {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// Repair every hole in `buf`, row by row. Returns the number of pixels
    /// rewritten.
    pub fn apply(&self, buf: &mut PixelBuffer) -> usize {
        let width = buf.width() as usize;
        let stride = width * CHANNELS;
        let data = buf.as_bytes_mut();

        let mut repaired = 0;
        let mut rows = data.chunks_exact_mut(stride);
        let Some(first) = rows.next() else {
            return 0;
        };
        repaired += self.fill_row(first, None);

        // Rows are processed top-down, so the row above is always already
        // repaired when it is used for blending.
        let mut prev: Vec<u8> = first.to_vec();
        for row in rows {
            repaired += self.fill_row(row, Some(&prev));
            prev.copy_from_slice(row);
        }

        debug!(repaired, threshold = self.threshold, "depth holes filled");
        repaired
    }

    fn fill_row(&self, row: &mut [u8], above: Option<&[u8]>) -> usize {
        let width = row.len() / CHANNELS;
        let t = self.threshold;
        let mut repaired = 0;
        let mut x = 0;

        while x < width {
            if value(row, x) >= t {
                x += 1;
                continue;
            }

            // Left boundary: the last valid pixel, or column 0 seeded with the
            // threshold when the hole starts at the row origin.
            let left = if x == 0 {
                write_scalar(row, 0, t);
                repaired += 1;
                0
            } else {
                x - 1
            };
            let left_value = value(row, left) as f32;

            if left + 1 >= width {
                break;
            }

            // Right boundary: first valid pixel after the left boundary, or
            // the last column clamped to the threshold.
            let right = match (left + 1..width).find(|&c| value(row, c) >= t) {
                Some(c) => c,
                None => {
                    write_scalar(row, width - 1, t);
                    repaired += 1;
                    width - 1
                }
            };
            let right_value = value(row, right) as f32;

            let span = (right - left) as f32;
            for c in left + 1..right {
                let frac = (c - left) as f32 / span;
                let lerp = left_value + (right_value - left_value) * frac;
                let blended = match above {
                    Some(above) => (lerp + value(above, c) as f32) / 2.0,
                    None => lerp,
                };
                write_scalar(row, c, blended.round().clamp(0.0, 255.0) as u8);
                repaired += 1;
            }

            x = right + 1;
        }

        repaired
    }
}

fn value(row: &[u8], x: usize) -> u8 {
    row[x * CHANNELS]
}

fn write_scalar(row: &mut [u8], x: usize, v: u8) {
    let i = x * CHANNELS;
    row[i..i + AUX_CHANNEL].fill(v);
}

// ── Depth-step check ─────────────────────────────────────────────────────────

/// Scan the auxiliary (depth) channel of a fused buffer for a sharp rise in
/// depth between pixels `NEXT_PIXEL_INTERVAL` columns apart. Zero depth means
/// "no data" and is skipped.
pub fn detect_depth_step(buf: &PixelBuffer) -> bool {
    let width = buf.width() as usize;
    if width <= NEXT_PIXEL_INTERVAL {
        return false;
    }

    buf.as_bytes()
        .chunks_exact(width * CHANNELS)
        .any(|row| {
            (0..width - NEXT_PIXEL_INTERVAL).any(|x| {
                let depth = row[x * CHANNELS + AUX_CHANNEL] as i32;
                let next = row[(x + NEXT_PIXEL_INTERVAL) * CHANNELS + AUX_CHANNEL] as i32;
                depth != 0 && next != 0 && next - depth > OBSTACLE_DIFF_THRESHOLD
            })
        })
}
