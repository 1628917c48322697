//! buffer — the interleaved 4-channel pixel container
//!
//! Every frame, depth map and fused image moves through the core as a
//! `PixelBuffer`: `width × height` pixels, 4 bytes each, row-major. Channels
//! 0..3 are color; channel 3 is auxiliary and carries either real alpha or
//! depth magnitude depending on who holds the buffer.
//!
//! All coordinate access is bounds-checked and returns
//! `CoreError::IndexOutOfBounds` instead of reading past the row. This holds
//! in debug builds as well: out-of-range access never panics, so callers
//! handle it the same way in every profile.

use fast_image_resize as fr;
use image::RgbaImage;

use crate::error::{CoreError, CoreResult};

/// Bytes per pixel.
pub const CHANNELS: usize = 4;
/// Number of color channels preceding the auxiliary channel.
pub const COLOR_CHANNELS: usize = 3;
/// Index of the auxiliary (alpha / depth) channel.
pub const AUX_CHANNEL: usize = 3;

/// Working resolution the capture layer normalizes frames to.
pub const WORKING_WIDTH: u32 = 320;
pub const WORKING_HEIGHT: u32 = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

fn byte_len(width: u32, height: u32) -> Option<usize> {
    if width == 0 || height == 0 {
        return None;
    }
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(CHANNELS)
}

impl PixelBuffer {
    /// Allocate a zero-filled buffer. Fails on zero or overflowing dimensions
    /// and when the allocator refuses the request.
    pub fn allocate(width: u32, height: u32) -> CoreResult<Self> {
        let len = byte_len(width, height).ok_or(CoreError::Allocation { width, height })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| CoreError::Allocation { width, height })?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Wrap existing RGBA bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> CoreResult<Self> {
        let expected = byte_len(width, height).ok_or(CoreError::Allocation { width, height })?;
        if data.len() != expected {
            return Err(CoreError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a depth-only buffer from one scalar per pixel. The scalar is
    /// replicated into the three color channels; the auxiliary channel is 255.
    pub fn from_depth(width: u32, height: u32, depth: &[u8]) -> CoreResult<Self> {
        let mut buf = Self::allocate(width, height)?;
        if depth.len() != buf.pixel_count() {
            return Err(CoreError::InvalidLength {
                expected: buf.pixel_count(),
                actual: depth.len(),
            });
        }
        for (px, &d) in buf.data.chunks_exact_mut(CHANNELS).zip(depth) {
            px[..COLOR_CHANNELS].fill(d);
            px[AUX_CHANNEL] = 255;
        }
        Ok(buf)
    }

    pub fn from_rgba_image(img: RgbaImage) -> CoreResult<Self> {
        let (width, height) = img.dimensions();
        Self::from_raw(width, height, img.into_raw())
    }

    pub fn into_rgba_image(self) -> CoreResult<RgbaImage> {
        let expected = self.data.len();
        RgbaImage::from_raw(self.width, self.height, self.data).ok_or(CoreError::InvalidLength {
            expected,
            actual: expected,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, x: u32, y: u32, channel: usize) -> CoreResult<usize> {
        if x >= self.width || y >= self.height || channel >= CHANNELS {
            return Err(CoreError::IndexOutOfBounds {
                x,
                y,
                channel,
                width: self.width,
                height: self.height,
            });
        }
        Ok((y as usize * self.width as usize + x as usize) * CHANNELS + channel)
    }

    pub fn get(&self, x: u32, y: u32, channel: usize) -> CoreResult<u8> {
        let i = self.offset(x, y, channel)?;
        Ok(self.data[i])
    }

    pub fn set(&mut self, x: u32, y: u32, channel: usize, value: u8) -> CoreResult<()> {
        let i = self.offset(x, y, channel)?;
        self.data[i] = value;
        Ok(())
    }

    pub fn pixel(&self, x: u32, y: u32) -> CoreResult<[u8; CHANNELS]> {
        let i = self.offset(x, y, 0)?;
        let mut px = [0u8; CHANNELS];
        px.copy_from_slice(&self.data[i..i + CHANNELS]);
        Ok(px)
    }

    /// Write `value` into the three color channels, leaving the auxiliary
    /// channel alone.
    pub fn set_color_scalar(&mut self, x: u32, y: u32, value: u8) -> CoreResult<()> {
        let i = self.offset(x, y, 0)?;
        self.data[i..i + COLOR_CHANNELS].fill(value);
        Ok(())
    }

    pub fn row(&self, y: u32) -> CoreResult<&[u8]> {
        let start = self.offset(0, y, 0)?;
        Ok(&self.data[start..start + self.width as usize * CHANNELS])
    }


    /// Bilinear rescale into a newly allocated buffer. The auxiliary channel
    /// is resampled as an independent channel, never used to premultiply.
    pub fn resized(&self, width: u32, height: u32) -> CoreResult<PixelBuffer> {
        self.resize_with(width, height, fr::ResizeAlg::Convolution(fr::FilterType::Bilinear))
    }

    /// Nearest-neighbour rescale. Every output pixel is a copy of an input
    /// pixel, so depth maps never gain values the sensor did not report.
    pub fn resized_nearest(&self, width: u32, height: u32) -> CoreResult<PixelBuffer> {
        self.resize_with(width, height, fr::ResizeAlg::Nearest)
    }

    fn resize_with(&self, width: u32, height: u32, alg: fr::ResizeAlg) -> CoreResult<PixelBuffer> {
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        let out = Self::allocate(width, height)?;

        let src = fr::images::ImageRef::new(self.width, self.height, &self.data, fr::PixelType::U8x4)
            .map_err(|e| CoreError::Resize(e.to_string()))?;
        let mut dst = fr::images::Image::from_vec_u8(width, height, out.data, fr::PixelType::U8x4)
            .map_err(|e| CoreError::Resize(e.to_string()))?;

        let options = fr::ResizeOptions::new().resize_alg(alg).use_alpha(false);
        fr::Resizer::new()
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| CoreError::Resize(e.to_string()))?;

        Ok(Self {
            width,
            height,
            data: dst.into_vec(),
        })
    }
}
