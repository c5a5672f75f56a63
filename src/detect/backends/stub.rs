use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};
use crate::frame::Frame;

/// Scripted backend for tests and the synthetic demo.
///
/// Each call to `detect` pops the next scripted frame result. Once the script
/// runs out the backend reports nothing, or repeats the last entry when built
/// with [`StubBackend::repeating`].
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<Detection>>,
    repeat_last: bool,
    last: Vec<Detection>,
    calls: u64,
}

impl StubBackend {
    /// Backend that never detects anything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Like `scripted`, but keeps returning the final entry once exhausted.
    pub fn repeating(script: Vec<Vec<Detection>>) -> Self {
        Self {
            repeat_last: true,
            ..Self::scripted(script)
        }
    }

    /// Number of frames seen so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        self.calls += 1;
        let detections = match self.script.pop_front() {
            Some(next) => {
                self.last = next.clone();
                next
            }
            None if self.repeat_last => self.last.clone(),
            None => Vec::new(),
        };
        Ok(DetectionResult::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;
    use std::time::Duration;

    fn frame() -> Frame {
        Frame::solid(2, 2, [0, 0, 0], 0, Duration::ZERO).unwrap()
    }

    fn fall() -> Detection {
        Detection::new("fall", 0.8, BoundingBox::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn stub_backend_replays_script_then_goes_quiet() {
        let mut backend = StubBackend::scripted(vec![vec![], vec![fall()]]);
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert_eq!(backend.detect(&frame()).unwrap().len(), 1);
        assert!(backend.detect(&frame()).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn repeating_stub_holds_last_entry() {
        let mut backend = StubBackend::repeating(vec![vec![fall()]]);
        for _ in 0..3 {
            assert_eq!(backend.detect(&frame()).unwrap().detections, vec![fall()]);
        }
    }
}
