#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::GestureDetector;
use crate::frame::Frame;

/// Tract-based open-hand classifier.
///
/// Loads a local ONNX model taking a `1x3xHxW` float input in 0..1 and treats
/// the maximum output score as the open-hand probability. No network I/O; the
/// model file is only read at construction.
pub struct TractGestureDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractGestureDetector {
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

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        let pixels = frame.pixels();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_confidence(&self, outputs: TVec<TValue>) -> Result<f32> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let max_score = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        if max_score.is_finite() {
            Ok(max_score)
        } else {
            Ok(0.0)
        }
    }
}

impl GestureDetector for TractGestureDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify_open_hand(&mut self, frame: &Frame) -> Result<bool> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let confidence = self.extract_confidence(outputs)?;
        Ok(confidence >= self.confidence_threshold)
    }
}
