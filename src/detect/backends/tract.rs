#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InspectionBackend;
use crate::detect::non_max_suppression;
use crate::detect::result::{Detection, InspectionResult, Verdict};

/// Tract-based backend for ONNX detection models.
///
/// Expects a YOLO-family head: a single output of shape
/// `[1, 4 + classes, anchors]` with box centers in input-pixel space.
/// Anything the model flags above the confidence threshold is a defect,
/// so the verdict is FAIL exactly when detections survive suppression.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    model_name: String,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let model_name = model_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("onnx")
            .to_string();

        Ok(Self {
            model,
            model_name,
            width,
            height,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            class_names: Vec::new(),
        })
    }

    /// Override the default score thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    /// Attach human-readable class names, indexed by class id.
    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        self.class_names = names;
        self
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn build_input(&self, resized: &image::RgbImage) -> Tensor {
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode_output(
        &self,
        outputs: &TVec<TValue>,
        scale_x: f32,
        scale_y: f32,
        frame_width: f32,
        frame_height: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let out = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;

        let (batch, rows, anchors) = out.dim();
        if batch != 1 || rows < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", out.shape()));
        }
        let classes = rows - 4;

        let mut candidates = Vec::new();
        for n in 0..anchors {
            let mut class_id = 0usize;
            let mut score = f32::NEG_INFINITY;
            for c in 0..classes {
                let s = out[[0, 4 + c, n]];
                if s > score {
                    score = s;
                    class_id = c;
                }
            }
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let cx = out[[0, 0, n]];
            let cy = out[[0, 1, n]];
            let w = out[[0, 2, n]];
            let h = out[[0, 3, n]];
            let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, frame_width);
            let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, frame_height);
            let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, frame_width);
            let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, frame_height);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            candidates.push(Detection {
                x1,
                y1,
                x2,
                y2,
                confidence: score.min(1.0),
                class_id: class_id as i64,
                class_name: self.class_name(class_id),
            });
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl InspectionBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&mut self, image: &[u8]) -> Result<InspectionResult> {
        let started = Instant::now();
        let decoded = image::load_from_memory(image)
            .context("decode image bytes")?
            .to_rgb8();
        let (frame_width, frame_height) = decoded.dimensions();
        let resized = image::imageops::resize(
            &decoded,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        let input = self.build_input(&resized);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let scale_x = frame_width as f32 / self.width as f32;
        let scale_y = frame_height as f32 / self.height as f32;
        let defects = self.decode_output(
            &outputs,
            scale_x,
            scale_y,
            frame_width as f32,
            frame_height as f32,
        )?;

        let verdict = if defects.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        Ok(InspectionResult {
            verdict,
            defects,
            confidence: None,
            predicted_class: None,
            model_name: self.model_name.clone(),
            inference_time: started.elapsed().as_secs_f64(),
        })
    }

    fn warm_up(&mut self) -> Result<()> {
        let zeros = Tensor::zero::<f32>(&[1, 3, self.height as usize, self.width as usize])
            .context("allocate warm-up tensor")?;
        self.model
            .run(tvec!(zeros.into()))
            .context("warm-up inference failed")?;
        Ok(())
    }
}
