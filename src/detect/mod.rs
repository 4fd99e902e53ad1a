//! Inference backends and verdict types.

mod backend;
mod backends;
mod result;

pub use backend::InspectionBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, InspectionResult, Verdict};

use anyhow::Result;

use crate::config::InferenceSettings;

/// Input edge length expected by ONNX detection models (YOLO default).
#[cfg(feature = "backend-tract")]
const MODEL_INPUT_SIZE: u32 = 640;

/// Build the inference backend for the configured model.
///
/// No `model_path` selects the deterministic stub; a path requires the
/// `backend-tract` feature.
pub fn select_backend(settings: &InferenceSettings) -> Result<Box<dyn InspectionBackend>> {
    match &settings.model_path {
        None => Ok(Box::new(StubBackend::new())),
        Some(path) => {
            #[cfg(feature = "backend-tract")]
            {
                let backend = TractBackend::new(path, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE)?
                    .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow::anyhow!(
                    "model {} requires onnx support (enable the backend-tract feature)",
                    path
                ))
            }
        }
    }
}

/// Intersection-over-union of two boxes.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy per-class non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
