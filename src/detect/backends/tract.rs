#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection};
use crate::frame::Frame;

/// Tract-based SSD object detector.
///
/// Expects an SSD-style ONNX export taking a `uint8 [1, H, W, 3]` image and
/// producing, in order, `boxes [1, N, 4]` (normalized `ymin, xmin, ymax, xmax`),
/// `classes [1, N]` and `scores [1, N]`. Class ids are looked up in the labels
/// file, one label per line, line `n` naming class id `n`.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    pub fn new(
        model_path: &Path,
        labels_path: Option<&Path>,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, input_height as usize, input_width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = match labels_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read labels {}", path.display()))?
                .lines()
                .map(|l| l.trim().to_string())
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            model,
            labels,
            input_width,
            input_height,
        })
    }

    fn label(&self, class_id: f32) -> String {
        let id = class_id.round() as i64;
        usize::try_from(id - 1)
            .ok()
            .and_then(|idx| self.labels.get(idx))
            .filter(|l| !l.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("class {}", id))
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        let resized = imageops::resize(
            &image,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.input_height as usize, self.input_width as usize, 3),
            |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c],
        );
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < 3 {
            return Err(anyhow!("model produced {} outputs, expected 3", outputs.len()));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("class tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;

        let boxes = boxes.as_slice().ok_or_else(|| anyhow!("box tensor not contiguous"))?;
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        let count = scores.len().min(classes.len()).min(boxes.len() / 4);

        let (w, h) = (frame.width as f32, frame.height as f32);
        let detections = (0..count)
            .map(|i| {
                let b = &boxes[i * 4..i * 4 + 4];
                let (ymin, xmin, ymax, xmax) = (b[0], b[1], b[2], b[3]);
                Detection::new(
                    self.label(classes[i]),
                    scores[i],
                    BBox::new(xmin * w, ymin * h, (xmax - xmin) * w, (ymax - ymin) * h),
                )
            })
            .collect();
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::solid(self.input_width, self.input_height, [0, 0, 0], 0);
        self.detect(&blank).map(|_| ())
    }
}
