use crate::shared::detection::BoundingBox;
use crate::shared::frame::Frame;

/// Domain interface for face descriptor extraction.
///
/// Maps a face crop to a fixed-length L2-normalized vector. The descriptor
/// is diagnostic metadata on a detection; detection itself never depends
/// on it.
pub trait FaceEmbedder: Send {
    fn embed(
        &mut self,
        frame: &Frame,
        bbox: &BoundingBox,
    ) -> Result<Vec<f32>, Box<dyn std::error::Error>>;
}
