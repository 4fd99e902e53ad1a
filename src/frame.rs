//! RGB frames and JPEG transport encoding.
//!
//! `Frame` is the unit handed from capture to inference and evidence
//! storage. When no camera frame is available the pipeline still needs
//! something to encode, so `Frame::placeholder()` renders a deterministic
//! marker frame: fixed size, solid background, and a visible caption so a
//! human reviewer can tell the evidence came from a degraded station.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;

/// Placeholder frames are square at this edge length.
pub const PLACEHOLDER_SIZE: u32 = 640;
/// Caption rendered onto placeholder frames.
pub const PLACEHOLDER_CAPTION: &str = "MOCK FRAME";

const JPEG_QUALITY: u8 = 90;

/// One captured frame, RGB8, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode image bytes")?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Encode as JPEG for the inference backend and evidence storage.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder
            .encode(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode frame as jpeg")?;
        Ok(out)
    }

    /// Deterministic stand-in used when no camera frame is available.
    pub fn placeholder() -> Self {
        let size = PLACEHOLDER_SIZE;
        let mut pixels = vec![0u8; (size as usize) * (size as usize) * 3];
        draw_caption(&mut pixels, size, size, PLACEHOLDER_CAPTION);
        Self {
            pixels,
            width: size,
            height: size,
        }
    }
}

// ----------------------------------------------------------------------------
// Caption rendering
// ----------------------------------------------------------------------------

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
const GLYPH_SCALE: usize = 8;
const CAPTION_RGB: [u8; 3] = [0, 255, 0];

/// 5x7 bitmap rows, most significant of the low 5 bits is the left column.
/// Covers exactly the characters the placeholder caption needs; anything
/// else renders as a blank cell.
fn glyph(ch: char) -> [u8; GLYPH_HEIGHT] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        _ => [0; GLYPH_HEIGHT],
    }
}

fn draw_caption(pixels: &mut [u8], width: u32, height: u32, text: &str) {
    let advance = (GLYPH_WIDTH + 1) * GLYPH_SCALE;
    let text_width = text.chars().count() * advance;
    let x0 = (width as usize).saturating_sub(text_width) / 2;
    let y0 = (height as usize).saturating_sub(GLYPH_HEIGHT * GLYPH_SCALE) / 2;

    for (ci, ch) in text.chars().enumerate() {
        let rows = glyph(ch.to_ascii_uppercase());
        for (ry, row) in rows.iter().enumerate() {
            for rx in 0..GLYPH_WIDTH {
                if row & (1 << (GLYPH_WIDTH - 1 - rx)) == 0 {
                    continue;
                }
                fill_block(
                    pixels,
                    width,
                    height,
                    x0 + ci * advance + rx * GLYPH_SCALE,
                    y0 + ry * GLYPH_SCALE,
                );
            }
        }
    }
}

fn fill_block(pixels: &mut [u8], width: u32, height: u32, x0: usize, y0: usize) {
    for dy in 0..GLYPH_SCALE {
        for dx in 0..GLYPH_SCALE {
            let x = x0 + dx;
            let y = y0 + dy;
            if x >= width as usize || y >= height as usize {
                continue;
            }
            let idx = (y * width as usize + x) * 3;
            pixels[idx..idx + 3].copy_from_slice(&CAPTION_RGB);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_pixel_length() {
        assert!(Frame::new(vec![0u8; 10], 4, 4).is_err());
        assert!(Frame::new(vec![0u8; 48], 4, 4).is_ok());
    }

    #[test]
    fn placeholder_is_deterministic_and_nonempty() {
        let a = Frame::placeholder();
        let b = Frame::placeholder();
        assert_eq!(a, b);
        assert_eq!(a.width, PLACEHOLDER_SIZE);
        assert_eq!(a.height, PLACEHOLDER_SIZE);
        assert!(!a.is_empty());
    }

    #[test]
    fn placeholder_caption_is_visible() {
        let frame = Frame::placeholder();
        let lit = frame
            .pixels
            .chunks_exact(3)
            .filter(|px| px[1] == 255)
            .count();
        // The caption must cover a visible area, not a stray pixel or two.
        assert!(lit > 1000, "caption covered only {} pixels", lit);
    }

    #[test]
    fn to_jpeg_produces_decodable_bytes() -> Result<()> {
        let frame = Frame::placeholder();
        let jpeg = frame.to_jpeg()?;
        assert!(jpeg.len() > 2);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "missing JPEG SOI marker");

        let decoded = Frame::decode(&jpeg)?;
        assert_eq!(decoded.width, frame.width);
        assert_eq!(decoded.height, frame.height);
        Ok(())
    }
}
