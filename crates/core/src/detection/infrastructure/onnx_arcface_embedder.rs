/// ArcFace descriptor extractor using ONNX Runtime.
///
/// Crops the detected face with a small margin, feeds it through the
/// embedding model, and returns an L2-normalized vector. Purely additive
/// metadata on a detection.
use std::path::Path;

use crate::detection::domain::face_embedder::FaceEmbedder;
use crate::detection::infrastructure::onnx_session::build_session;
use crate::shared::detection::BoundingBox;
use crate::shared::frame::Frame;

const INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

/// Margin around the detection box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.2;

pub struct OnnxArcfaceEmbedder {
    session: ort::session::Session,
}

impl OnnxArcfaceEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            session: build_session(model_path)?,
        })
    }
}

impl FaceEmbedder for OnnxArcfaceEmbedder {
    fn embed(
        &mut self,
        frame: &Frame,
        bbox: &BoundingBox,
    ) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let crop = expanded_crop(bbox, frame.width(), frame.height());
        if crop.width < 1.0 || crop.height < 1.0 {
            return Err("face box has no visible area".into());
        }

        let tensor = preprocess(frame, &crop);
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let embedding_slice = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?;

        let mut embedding = embedding_slice.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Grow the box by `CROP_MARGIN` on each side, clamped to the frame.
fn expanded_crop(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> BoundingBox {
    let mx = bbox.width * CROP_MARGIN;
    let my = bbox.height * CROP_MARGIN;
    BoundingBox {
        x: bbox.x - mx,
        y: bbox.y - my,
        width: bbox.width + 2.0 * mx,
        height: bbox.height + 2.0 * my,
    }
    .clamped(frame_width, frame_height)
}

/// Sample the crop into a 112×112 NCHW tensor, normalized to [-1, 1].
fn preprocess(frame: &Frame, crop: &BoundingBox) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_w = frame.width() as usize;
    let src_h = frame.height() as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        let fy = crop.y + (y as f32 + 0.5) * crop.height / INPUT_SIZE as f32;
        let src_y = (fy as usize).min(src_h.saturating_sub(1));
        for x in 0..INPUT_SIZE {
            let fx = crop.x + (x as f32 + 0.5) * crop.width / INPUT_SIZE as f32;
            let src_x = (fx as usize).min(src_w.saturating_sub(1));
            for c in 0..3 {
                tensor[[0, c, y, x]] = (src[[src_y, src_x, c]] as f32 - NORM_MEAN) / NORM_STD;
            }
        }
    }

    tensor
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_l2_normalize_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_expanded_crop_adds_margin() {
        let crop = expanded_crop(&bbox(100.0, 100.0, 100.0, 100.0), 640, 480);
        assert_relative_eq!(crop.x, 80.0);
        assert_relative_eq!(crop.y, 80.0);
        assert_relative_eq!(crop.width, 140.0);
        assert_relative_eq!(crop.height, 140.0);
    }

    #[test]
    fn test_expanded_crop_clamps_at_edges() {
        let crop = expanded_crop(&bbox(0.0, 0.0, 100.0, 100.0), 640, 480);
        assert_relative_eq!(crop.x, 0.0);
        assert_relative_eq!(crop.y, 0.0);
        assert_relative_eq!(crop.width, 120.0);
    }

    #[test]
    fn test_preprocess_shape() {
        let frame = Frame::new(vec![128u8; 50 * 50 * 3], 50, 50, 0);
        let tensor = preprocess(&frame, &bbox(0.0, 0.0, 50.0, 50.0));
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_range() {
        let frame = Frame::new(vec![255u8; 10 * 10 * 3], 10, 10, 0);
        let tensor = preprocess(&frame, &bbox(0.0, 0.0, 10.0, 10.0));
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 1.0, epsilon = 0.01);

        let frame = Frame::new(vec![0u8; 10 * 10 * 3], 10, 10, 0);
        let tensor = preprocess(&frame, &bbox(0.0, 0.0, 10.0, 10.0));
        assert_relative_eq!(tensor[[0, 0, 0, 0]], -1.0, epsilon = 0.01);
    }

    #[test]
    fn test_preprocess_samples_only_the_crop() {
        // Left half black, right half white; crop the right half.
        let mut data = vec![0u8; 20 * 10 * 3];
        for y in 0..10 {
            for x in 10..20 {
                let off = (y * 20 + x) * 3;
                data[off..off + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let frame = Frame::new(data, 20, 10, 0);
        let tensor = preprocess(&frame, &bbox(10.0, 0.0, 10.0, 10.0));
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 1.0, epsilon = 0.01);
        assert_relative_eq!(tensor[[0, 0, 111, 111]], 1.0, epsilon = 0.01);
    }
}
