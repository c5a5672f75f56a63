use crate::detect::result::{Detection, DetectionResult};

/// The watched predicate: "target label detected at or above threshold".
#[derive(Clone, Debug, PartialEq)]
pub struct FallCondition {
    pub watched_label: String,
    pub confidence_threshold: f32,
}

impl FallCondition {
    pub fn new(watched_label: impl Into<String>, confidence_threshold: f32) -> Self {
        Self {
            watched_label: watched_label.into(),
            confidence_threshold,
        }
    }

    /// True when this single box satisfies the condition.
    pub fn matches(&self, detection: &Detection) -> bool {
        detection.label == self.watched_label
            && detection.confidence >= self.confidence_threshold
    }

    /// Reduce a frame's detections to the per-frame boolean.
    pub fn is_met(&self, result: &DetectionResult) -> bool {
        result.iter().any(|d| self.matches(d))
    }
}

impl Default for FallCondition {
    fn default() -> Self {
        Self::new("fall", 0.5)
    }
}
