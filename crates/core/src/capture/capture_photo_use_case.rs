use std::io::Cursor;

use image::ImageFormat;

use crate::segmentation::domain::background_remover::BackgroundRemover;
use crate::shared::frame::Frame;

/// The background-removed capture result: raw pixels for display plus a
/// PNG encoding for export. At most one of these is alive in the app.
#[derive(Clone, Debug)]
pub struct ProcessedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub png: Vec<u8>,
}

/// Single-capture pipeline: snapshot → background removal → encode.
///
/// Runs once per capture press; not cancellable and never retried
/// automatically.
pub struct CapturePhotoUseCase {
    remover: Box<dyn BackgroundRemover>,
}

impl CapturePhotoUseCase {
    pub fn new(remover: Box<dyn BackgroundRemover>) -> Self {
        Self { remover }
    }

    pub fn execute(&mut self, frame: &Frame) -> Result<ProcessedImage, Box<dyn std::error::Error>> {
        let rgba = self.remover.remove(frame)?;
        let (width, height) = rgba.dimensions();

        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(rgba.clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        Ok(ProcessedImage {
            width,
            height,
            rgba: rgba.into_raw(),
            png,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::{Arc, Mutex};

    // --- Stubs ---

    struct StubRemover {
        alpha: u8,
        calls: Arc<Mutex<Vec<u64>>>,
    }

    impl StubRemover {
        fn new(alpha: u8) -> Self {
            Self {
                alpha,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl BackgroundRemover for StubRemover {
        fn remove(&mut self, frame: &Frame) -> Result<RgbaImage, Box<dyn std::error::Error>> {
            self.calls.lock().unwrap().push(frame.seq());
            Ok(RgbaImage::from_pixel(
                frame.width(),
                frame.height(),
                image::Rgba([1, 2, 3, self.alpha]),
            ))
        }
    }

    struct FailingRemover;

    impl BackgroundRemover for FailingRemover {
        fn remove(&mut self, _frame: &Frame) -> Result<RgbaImage, Box<dyn std::error::Error>> {
            Err("matting model unavailable".into())
        }
    }

    fn make_frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![128; (w * h * 3) as usize], w, h, 42)
    }

    // --- Tests ---

    #[test]
    fn test_result_dimensions_match_frame() {
        let mut uc = CapturePhotoUseCase::new(Box::new(StubRemover::new(255)));
        let result = uc.execute(&make_frame(64, 48)).unwrap();
        assert_eq!(result.width, 64);
        assert_eq!(result.height, 48);
        assert_eq!(result.rgba.len(), 64 * 48 * 4);
    }

    #[test]
    fn test_remover_sees_the_captured_frame() {
        let remover = StubRemover::new(255);
        let calls = remover.calls.clone();
        let mut uc = CapturePhotoUseCase::new(Box::new(remover));
        uc.execute(&make_frame(8, 8)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![42]);
    }

    #[test]
    fn test_png_encoding_is_valid() {
        let mut uc = CapturePhotoUseCase::new(Box::new(StubRemover::new(200)));
        let result = uc.execute(&make_frame(16, 16)).unwrap();
        let decoded = image::load_from_memory(&result.png).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (16, 16));
        assert_eq!(decoded.get_pixel(0, 0).0, [1, 2, 3, 200]);
    }

    #[test]
    fn test_removal_failure_propagates() {
        let mut uc = CapturePhotoUseCase::new(Box::new(FailingRemover));
        let result = uc.execute(&make_frame(8, 8));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("matting model unavailable"));
    }
}
