use image::RgbaImage;

use crate::shared::frame::Frame;

/// Domain interface for background removal.
///
/// Takes a still frame and returns it with background pixels made
/// transparent. Output dimensions always match the input frame.
pub trait BackgroundRemover: Send {
    fn remove(&mut self, frame: &Frame) -> Result<RgbaImage, Box<dyn std::error::Error>>;
}
