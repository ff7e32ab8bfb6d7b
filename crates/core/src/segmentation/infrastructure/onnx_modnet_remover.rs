/// MODNet portrait matting via ONNX Runtime.
///
/// Produces a soft alpha matte at the model's working resolution, upsamples
/// it to the frame, and writes it into the alpha channel. Everything runs
/// with model defaults; there is no configuration surface.
use std::path::Path;

use image::RgbaImage;

use crate::detection::infrastructure::onnx_session::build_session;
use crate::segmentation::domain::background_remover::BackgroundRemover;
use crate::shared::frame::Frame;

/// MODNet working resolution.
const INPUT_SIZE: usize = 512;

const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct OnnxModnetRemover {
    session: ort::session::Session,
}

impl OnnxModnetRemover {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            session: build_session(model_path)?,
        })
    }
}

impl BackgroundRemover for OnnxModnetRemover {
    fn remove(&mut self, frame: &Frame) -> Result<RgbaImage, Box<dyn std::error::Error>> {
        let input_tensor = preprocess(frame, INPUT_SIZE);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;

        // Matte: [1, 1, 512, 512], foreground probability per pixel.
        let matte = outputs[0].try_extract_array::<f32>()?;
        let matte_data = matte.as_slice().ok_or("Cannot get matte slice")?;
        if matte_data.len() < INPUT_SIZE * INPUT_SIZE {
            return Err(format!(
                "matte output too small: {} values, expected {}",
                matte_data.len(),
                INPUT_SIZE * INPUT_SIZE
            )
            .into());
        }

        Ok(apply_matte(frame, matte_data, INPUT_SIZE, INPUT_SIZE))
    }
}

/// Resize frame to `size × size` and normalize to [-1, 1] NCHW float32.
fn preprocess(frame: &Frame, size: usize) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, size, size));
    if src_h == 0 || src_w == 0 {
        return tensor;
    }

    for y in 0..size {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / size as f64) as usize)
            .min(src_h.saturating_sub(1));
        for x in 0..size {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / size as f64) as usize)
                .min(src_w.saturating_sub(1));
            for c in 0..3 {
                tensor[[0, c, y, x]] = (src[[src_y, src_x, c]] as f32 - NORM_MEAN) / NORM_STD;
            }
        }
    }

    tensor
}

/// Upsample the matte to frame resolution (nearest neighbor) and write it
/// into the alpha channel of the frame's pixels.
fn apply_matte(frame: &Frame, matte: &[f32], matte_w: usize, matte_h: usize) -> RgbaImage {
    let fw = frame.width() as usize;
    let fh = frame.height() as usize;
    let rgb = frame.data();

    let mut out = RgbaImage::new(frame.width(), frame.height());
    for y in 0..fh {
        let my = (y * matte_h / fh.max(1)).min(matte_h - 1);
        for x in 0..fw {
            let mx = (x * matte_w / fw.max(1)).min(matte_w - 1);
            let alpha = (matte[my * matte_w + mx].clamp(0.0, 1.0) * 255.0).round() as u8;
            let off = (y * fw + x) * 3;
            out.put_pixel(
                x as u32,
                y as u32,
                image::Rgba([rgb[off], rgb[off + 1], rgb[off + 2], alpha]),
            );
        }
    }
    out
}
