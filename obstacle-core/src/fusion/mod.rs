//! fusion — fold a depth map into the auxiliary channel of a color frame
//!
//! The color frame is consumed and returned with its auxiliary channel
//! replaced by the mean of the depth pixel's three color channels. A mean of 0
//! is written as 1: image consumers drop the color of fully transparent pixels.

use rayon::prelude::*;

use crate::buffer::{AUX_CHANNEL, CHANNELS, PixelBuffer};
use crate::error::{CoreError, CoreResult};

/// Lowest auxiliary value written into a fused pixel.
pub const MIN_FUSED_AUX: u8 = 1;

/// Fuse `depth` into `color`. Dimensions must match exactly.
pub fn fuse(mut color: PixelBuffer, depth: &PixelBuffer) -> CoreResult<PixelBuffer> {
    if color.dimensions() != depth.dimensions() {
        return Err(CoreError::DimensionMismatch {
            left: color.dimensions(),
            right: depth.dimensions(),
        });
    }

    color
        .as_bytes_mut()
        .par_chunks_exact_mut(CHANNELS)
        .zip(depth.as_bytes().par_chunks_exact(CHANNELS))
        .for_each(|(out, d)| out[AUX_CHANNEL] = fused_aux(d[0], d[1], d[2]));

    Ok(color)
}

/// Like [`fuse`], for callers whose capture layer may not have delivered
/// both halves of a frame pair.
pub fn fuse_pair(color: Option<PixelBuffer>, depth: Option<&PixelBuffer>) -> CoreResult<PixelBuffer> {
    let color = color.ok_or(CoreError::MissingInput("color"))?;
    let depth = depth.ok_or(CoreError::MissingInput("depth"))?;
    fuse(color, depth)
}

/// `round((r + g + b) / 3)`, floored at `MIN_FUSED_AUX`.
pub fn fused_aux(r: u8, g: u8, b: u8) -> u8 {
    let sum = r as u32 + g as u32 + b as u32;
    // Integer form of round(sum / 3): the fractional part is 0, 1/3 or 2/3.
    let avg = ((sum + 1) / 3) as u8;
    avg.max(MIN_FUSED_AUX)
}
