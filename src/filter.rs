//! Per-frame detection filtering.
//!
//! Splits a frame's raw detections into the ones worth drawing (confidence above
//! the threshold, any class) and the ones worth verifying (additionally a vehicle
//! class and not under the exclusion mask). Input order is preserved.

use crate::detect::Detection;
use crate::mask::ExclusionMask;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.66;
pub const DEFAULT_VEHICLE_CLASSES: [&str; 2] = ["car", "vehicle"];

/// What the filter decided for one high-confidence detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Vehicle class, not excluded: eligible for verification.
    Actionable,
    /// Vehicle class, but overlaps the exclusion mask. Still drawn, flagged.
    Excluded,
    /// Not a vehicle class. Drawn only.
    Ignored,
}

/// A high-confidence detection and its verdict.
#[derive(Clone, Debug, PartialEq)]
pub struct Screened {
    pub detection: Detection,
    pub verdict: Verdict,
}

impl Screened {
    pub fn is_actionable(&self) -> bool {
        self.verdict == Verdict::Actionable
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOutcome {
    /// Every detection with `score > threshold`, in input order.
    pub high_confidence: Vec<Screened>,
    /// The actionable subset of `high_confidence`, in input order.
    pub actionable: Vec<Detection>,
}

impl FilterOutcome {
    pub fn excluded_count(&self) -> usize {
        self.high_confidence
            .iter()
            .filter(|s| s.verdict == Verdict::Excluded)
            .count()
    }
}

#[derive(Clone, Debug)]
pub struct DetectionFilter {
    threshold: f32,
    classes: Vec<String>,
}

impl DetectionFilter {
    /// `classes` are matched case-insensitively.
    pub fn new<I, S>(threshold: f32, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            threshold,
            classes: classes
                .into_iter()
                .map(|c| c.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_vehicle_class(&self, class: &str) -> bool {
        let class = class.to_lowercase();
        self.classes.iter().any(|c| c == &class)
    }

    pub fn filter(&self, raw: &[Detection], mask: &ExclusionMask) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        for det in raw {
            if det.score.is_nan() || det.score <= self.threshold {
                continue;
            }
            let verdict = if !self.is_vehicle_class(&det.class) {
                Verdict::Ignored
            } else if mask.is_excluded(&det.bbox) {
                Verdict::Excluded
            } else {
                Verdict::Actionable
            };
            if verdict == Verdict::Actionable {
                outcome.actionable.push(det.clone());
            }
            outcome.high_confidence.push(Screened {
                detection: det.clone(),
                verdict,
            });
        }
        outcome
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_VEHICLE_CLASSES)
    }
}
