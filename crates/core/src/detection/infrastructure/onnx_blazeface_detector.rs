/// BlazeFace face detector using ONNX Runtime via `ort`.
///
/// Short-range model: bounding box plus 6 keypoints per anchor. Configured
/// with a bounded input resolution and a minimum score threshold; only the
/// best-scoring candidate is reported, so no NMS pass is needed.
use std::path::Path;

use crate::detection::domain::face_detector::FaceDetector;
use crate::detection::infrastructure::onnx_session::build_session;
use crate::shared::detection::{BoundingBox, Detection, Point, LANDMARK_COUNT};
use crate::shared::frame::Frame;

/// Default model input resolution.
pub const DEFAULT_INPUT_SIZE: u32 = 128;

/// Default minimum score for a candidate to count as a face.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// Regressor values per anchor: 4 box deltas + 6 keypoints × 2.
const REGRESSOR_STRIDE: usize = 16;

/// Detector configuration, mirroring the two knobs the loop exposes.
#[derive(Clone, Copy, Debug)]
pub struct DetectorOptions {
    pub input_size: u32,
    pub score_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

pub struct OnnxBlazefaceDetector {
    session: ort::session::Session,
    options: DetectorOptions,
    anchors: Vec<[f32; 2]>,
}

impl OnnxBlazefaceDetector {
    /// Load a BlazeFace ONNX model.
    pub fn new(
        model_path: &Path,
        options: DetectorOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = build_session(model_path)?;
        let anchors = generate_anchors(options.input_size);
        Ok(Self {
            session,
            options,
            anchors,
        })
    }
}

impl FaceDetector for OnnxBlazefaceDetector {
    fn detect_single(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<Detection>, Box<dyn std::error::Error>> {
        let fw = frame.width();
        let fh = frame.height();

        let input_tensor = preprocess(frame, self.options.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;

        // BlazeFace outputs two tensors:
        // - regressors: [1, anchors, 16] (box deltas + keypoints)
        // - classificators: [1, anchors, 1] (raw confidence logits)
        if outputs.len() < 2 {
            return Err(
                format!("BlazeFace model expected 2 outputs, got {}", outputs.len()).into(),
            );
        }

        let regressors = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let reg_data = regressors.as_slice().ok_or("Cannot get regressor slice")?;
        let score_data = scores.as_slice().ok_or("Cannot get score slice")?;

        // Single-face contract: take the best-scoring anchor above threshold.
        let mut best: Option<(usize, f32)> = None;
        let num_anchors = self.anchors.len().min(score_data.len());
        for (i, &raw_score) in score_data.iter().enumerate().take(num_anchors) {
            let score = sigmoid(raw_score);
            if score < self.options.score_threshold {
                continue;
            }
            if reg_data.len() < (i + 1) * REGRESSOR_STRIDE {
                break;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((idx, score)) = best else {
            return Ok(None);
        };

        Ok(Some(decode_detection(
            &self.anchors[idx],
            &reg_data[idx * REGRESSOR_STRIDE..(idx + 1) * REGRESSOR_STRIDE],
            score,
            self.options.input_size,
            fw,
            fh,
        )))
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Resize frame to `size × size` and normalize to [0,1] NCHW float32.
fn preprocess(frame: &Frame, size: u32) -> ndarray::Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));
    if src_h == 0 || src_w == 0 {
        return tensor;
    }

    for y in 0..s {
        let src_y =
            (((y as f64 + 0.5) * src_h as f64 / s as f64) as usize).min(src_h.saturating_sub(1));
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as usize)
                .min(src_w.saturating_sub(1));
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    tensor
}

// ---------------------------------------------------------------------------
// Anchor generation and decoding
// ---------------------------------------------------------------------------

/// Generate anchor centers for the short-range model.
///
/// Two feature map strides, 8 and 16, with 2 and 6 anchors per cell. At the
/// default 128 input this yields 16×16×2 + 8×8×6 = 896 anchors.
fn generate_anchors(input_size: u32) -> Vec<[f32; 2]> {
    let strides = [(8u32, 2usize), (16, 6)];
    let mut anchors = Vec::new();

    for &(stride, num) in &strides {
        let grid_size = (input_size / stride) as usize;
        for y in 0..grid_size {
            for x in 0..grid_size {
                let cx = (x as f32 + 0.5) / grid_size as f32;
                let cy = (y as f32 + 0.5) / grid_size as f32;
                for _ in 0..num {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

/// Decode one anchor's regressor block into frame-space geometry.
fn decode_detection(
    anchor: &[f32; 2],
    reg: &[f32],
    score: f32,
    input_size: u32,
    frame_width: u32,
    frame_height: u32,
) -> Detection {
    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let scale = input_size as f32;

    let cx = anchor[0] + reg[0] / scale;
    let cy = anchor[1] + reg[1] / scale;
    let w = reg[2] / scale;
    let h = reg[3] / scale;

    let bbox = BoundingBox {
        x: (cx - w / 2.0) * fw,
        y: (cy - h / 2.0) * fh,
        width: w * fw,
        height: h * fh,
    }
    .clamped(frame_width, frame_height);

    let landmarks = (0..LANDMARK_COUNT)
        .map(|k| {
            let kx = anchor[0] + reg[4 + 2 * k] / scale;
            let ky = anchor[1] + reg[4 + 2 * k + 1] / scale;
            Point {
                x: (kx * fw).clamp(0.0, fw),
                y: (ky * fh).clamp(0.0, fh),
            }
        })
        .collect();

    Detection {
        bbox,
        landmarks,
        descriptor: None,
        score,
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
