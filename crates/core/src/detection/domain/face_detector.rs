use crate::shared::detection::Detection;
use crate::shared::frame::Frame;

/// Domain interface for single-face detection.
///
/// Returns the best detection in the frame, or `None` when nothing clears
/// the detector's score threshold. Implementations may be stateful, hence
/// `&mut self`.
pub trait FaceDetector: Send {
    fn detect_single(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<Detection>, Box<dyn std::error::Error>>;
}
