use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// One frame's worth of scripted model output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// When set, `detect` fails for this frame with the given message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScriptStep {
    pub fn detections(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            detections: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Replays a fixed detection script, one step per frame.
///
/// Used for headless runs and tests where no model weights are available.
/// The script wraps around once exhausted unless cycling is disabled, in which
/// case every later frame yields no detections.
pub struct ScriptedBackend {
    steps: Vec<ScriptStep>,
    cursor: usize,
    cycle: bool,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            cursor: 0,
            cycle: true,
        }
    }

    /// Backend that never reports anything.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load a JSON array of steps.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let steps: Vec<ScriptStep> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse detection script {}", path.display()))?;
        Ok(Self::new(steps))
    }

    pub fn with_cycle(mut self, cycle: bool) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.steps.is_empty() || (!self.cycle && self.cursor >= self.steps.len()) {
            return Ok(Vec::new());
        }
        let step = &self.steps[self.cursor % self.steps.len()];
        self.cursor += 1;
        match &step.error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(step.detections.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use std::io::Write;

    fn frame() -> Frame {
        Frame::solid(8, 8, [0, 0, 0], 1)
    }

    #[test]
    fn replays_steps_in_order_and_cycles() {
        let car = Detection::new("car", 0.9, BBox::new(1.0, 1.0, 2.0, 2.0));
        let mut backend = ScriptedBackend::new(vec![
            ScriptStep::detections(vec![car.clone()]),
            ScriptStep::failure("model hiccup"),
            ScriptStep::default(),
        ]);

        assert_eq!(backend.detect(&frame()).unwrap(), vec![car.clone()]);
        assert!(backend.detect(&frame()).is_err());
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert_eq!(backend.detect(&frame()).unwrap(), vec![car]);
    }

    #[test]
    fn non_cycling_script_goes_quiet() {
        let mut backend = ScriptedBackend::new(vec![ScriptStep::detections(vec![Detection::new(
            "car",
            0.9,
            BBox::new(0.0, 0.0, 1.0, 1.0),
        )])])
        .with_cycle(false);
        assert_eq!(backend.detect(&frame()).unwrap().len(), 1);
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert!(backend.detect(&frame()).unwrap().is_empty());
    }

    #[test]
    fn loads_json_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"detections":[{{"class":"car","score":0.91,"bbox":[10,10,50,50]}}]}},{{"error":"lost"}}]"#
        )
        .unwrap();
        let mut backend = ScriptedBackend::from_file(file.path()).unwrap();
        assert_eq!(backend.len(), 2);
        let dets = backend.detect(&frame()).unwrap();
        assert_eq!(dets[0].bbox, BBox::new(10.0, 10.0, 50.0, 50.0));
        assert!(backend.detect(&frame()).is_err());
    }

    #[test]
    fn empty_backend_reports_nothing() {
        let mut backend = ScriptedBackend::empty();
        assert!(backend.is_empty());
        assert!(backend.detect(&frame()).unwrap().is_empty());
    }
}
