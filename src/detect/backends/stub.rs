use anyhow::Result;
use std::time::Instant;

use crate::detect::backend::InspectionBackend;
use crate::detect::result::{Detection, InspectionResult, Verdict};
use crate::frame::Frame;

/// Pixels darker than this luma count toward the underexposure ratio.
const DARK_LUMA: u16 = 32;
/// Frames with more than this fraction of dark pixels fail inspection.
const DARK_RATIO_LIMIT: f32 = 0.15;

/// Deterministic backend for development and tests.
///
/// Flags underexposed frames as defective, passes everything else. Needs
/// no model file, which keeps `stub://` deployments self-contained.
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InspectionBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&mut self, image: &[u8]) -> Result<InspectionResult> {
        let started = Instant::now();
        let frame = Frame::decode(image)?;

        let total = (frame.width as usize) * (frame.height as usize);
        let dark = frame
            .pixels
            .chunks_exact(3)
            .filter(|px| (px[0] as u16 + px[1] as u16 + px[2] as u16) / 3 < DARK_LUMA)
            .count();
        let dark_ratio = if total == 0 {
            0.0
        } else {
            dark as f32 / total as f32
        };

        let mut defects = Vec::new();
        let verdict = if dark_ratio > DARK_RATIO_LIMIT {
            defects.push(Detection {
                x1: 0.0,
                y1: 0.0,
                x2: frame.width as f32,
                y2: frame.height as f32,
                confidence: dark_ratio.min(1.0),
                class_id: 0,
                class_name: "underexposed".to_string(),
            });
            Verdict::Fail
        } else {
            Verdict::Pass
        };

        Ok(InspectionResult {
            verdict,
            defects,
            confidence: None,
            predicted_class: None,
            model_name: "stub".to_string(),
            inference_time: started.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bright_jpeg() -> Vec<u8> {
        let frame = Frame::new(vec![200u8; 64 * 64 * 3], 64, 64).unwrap();
        frame.to_jpeg().unwrap()
    }

    #[test]
    fn dark_frames_fail_inspection() -> Result<()> {
        let mut backend = StubBackend::new();
        let result = backend.predict(&Frame::placeholder().to_jpeg()?)?;
        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.defects.len(), 1);
        assert_eq!(result.defects[0].class_name, "underexposed");
        assert!(result.defects[0].confidence > DARK_RATIO_LIMIT);
        Ok(())
    }

    #[test]
    fn bright_frames_pass_inspection() -> Result<()> {
        let mut backend = StubBackend::new();
        let result = backend.predict(&bright_jpeg())?;
        assert_eq!(result.verdict, Verdict::Pass);
        assert!(result.defects.is_empty());
        assert_eq!(result.model_name, "stub");
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_an_error() {
        let mut backend = StubBackend::new();
        assert!(backend.predict(b"not an image").is_err());
    }
}
