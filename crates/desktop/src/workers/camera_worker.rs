use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use snapmatte_core::detection::domain::face_detector::FaceDetector;
use snapmatte_core::detection::domain::face_embedder::FaceEmbedder;
use snapmatte_core::detection::infrastructure::onnx_arcface_embedder::OnnxArcfaceEmbedder;
use snapmatte_core::detection::infrastructure::onnx_blazeface_detector::{
    DetectorOptions, OnnxBlazefaceDetector,
};
use snapmatte_core::shared::constants::{DETECT_INTERVAL_MS, PREVIEW_WIDTH};
use snapmatte_core::shared::detection::Detection;
use snapmatte_core::shared::frame::Frame;
use snapmatte_core::shared::overlay;

use super::model_cache::ModelCache;

/// Messages sent from the camera worker to the UI.
#[derive(Debug, Clone)]
pub enum CameraMessage {
    DownloadProgress(u64, u64),
    Started { width: u32, height: u32 },
    Sample(CameraSample),
    /// An iteration produced no sample; the score is no longer current.
    SampleFailed,
    Error(String),
}

/// Consecutive iteration failures tolerated before the worker gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 20;

/// One iteration's output: the clean native frame for capture, the
/// overlay-composited preview for display, and the latest score.
#[derive(Debug, Clone)]
pub struct CameraSample {
    pub frame: Frame,
    pub preview_rgba: Vec<u8>,
    pub preview_width: u32,
    pub preview_height: u32,
    pub detection: Option<Detection>,
    pub score: f32,
}

/// List available camera devices as `(index, human name)` pairs.
pub fn list_devices() -> Result<Vec<(u32, String)>, Box<dyn std::error::Error>> {
    let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
    Ok(devices
        .iter()
        .enumerate()
        .map(|(idx, info)| (idx as u32, info.human_name().to_string()))
        .collect())
}

/// Spawn the camera worker: model load, camera open, then the detection
/// loop. Returns the message receiver and the stop flag that ends the loop
/// at teardown.
pub fn spawn(
    device_index: u32,
    mirror: bool,
    model_cache: Arc<ModelCache>,
) -> (Receiver<CameraMessage>, Arc<AtomicBool>) {
    // Bounded so a stalled UI drops samples instead of queueing them.
    let (tx, rx) = crossbeam_channel::bounded::<CameraMessage>(4);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();

    thread::spawn(move || {
        run(&tx, &stop_clone, device_index, mirror, &model_cache);
    });

    (rx, stop)
}

fn run(
    tx: &Sender<CameraMessage>,
    stop: &AtomicBool,
    device_index: u32,
    mirror: bool,
    model_cache: &ModelCache,
) {
    // The original flow loads models first, then starts the video.
    let tx_dl = tx.clone();
    let detector_path = match model_cache.wait_for_detector(
        &|dl, total| {
            let _ = tx_dl.try_send(CameraMessage::DownloadProgress(dl, total));
        },
        stop,
    ) {
        Ok(path) => path,
        Err(e) => {
            let _ = tx.send(CameraMessage::Error(format!("detector model: {e}")));
            return;
        }
    };
    if stop.load(Ordering::Relaxed) {
        return;
    }

    let mut detector = match OnnxBlazefaceDetector::new(&detector_path, DetectorOptions::default())
    {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.send(CameraMessage::Error(format!("detector load: {e}")));
            return;
        }
    };

    // The embedder is optional: detection works without descriptors.
    let mut embedder = build_embedder(model_cache, stop);
    if stop.load(Ordering::Relaxed) {
        return;
    }

    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(CameraIndex::Index(device_index), requested) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.send(CameraMessage::Error(format!(
                "failed to open camera {device_index}: {e}"
            )));
            return;
        }
    };
    if let Err(e) = camera.open_stream() {
        let _ = tx.send(CameraMessage::Error(format!(
            "failed to start camera stream: {e}"
        )));
        return;
    }

    let resolution = camera.resolution();
    log::info!(
        "camera {device_index} streaming at {}x{}",
        resolution.width(),
        resolution.height()
    );
    let _ = tx.send(CameraMessage::Started {
        width: resolution.width(),
        height: resolution.height(),
    });

    // The detection loop: one iteration at a time, re-armed after success
    // and failure alike, until the stop flag is set.
    let mut seq: u64 = 0;
    let mut consecutive_failures: u32 = 0;
    while !stop.load(Ordering::Relaxed) {
        match sample_once(&mut camera, &mut detector, embedder.as_mut(), mirror, seq) {
            Ok(sample) => {
                consecutive_failures = 0;
                if let Err(TrySendError::Full(_)) = tx.try_send(CameraMessage::Sample(sample)) {
                    log::debug!("UI behind, dropping sample {seq}");
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                log::warn!("detection iteration {seq} failed: {e}");
                // The UI must learn the score is stale even without a sample.
                let _ = tx.try_send(CameraMessage::SampleFailed);
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    let _ = tx.send(CameraMessage::Error(format!(
                        "camera stopped producing frames: {e}"
                    )));
                    break;
                }
            }
        }
        seq += 1;
        thread::sleep(Duration::from_millis(DETECT_INTERVAL_MS));
    }

    if let Err(e) = camera.stop_stream() {
        log::warn!("failed to stop camera stream: {e}");
    }
    log::info!("camera worker stopped");
}

fn build_embedder(
    model_cache: &ModelCache,
    stop: &AtomicBool,
) -> Option<Box<dyn FaceEmbedder>> {
    match model_cache.wait_for_embedding(&|_, _| {}, stop) {
        Ok(path) => match OnnxArcfaceEmbedder::new(&path) {
            Ok(e) => Some(Box::new(e)),
            Err(e) => {
                log::warn!("embedding model load failed, descriptors disabled: {e}");
                None
            }
        },
        Err(e) => {
            log::warn!("embedding model unavailable, descriptors disabled: {e}");
            None
        }
    }
}

/// One loop iteration: grab a frame, detect, attach the descriptor, and
/// compose the overlay preview.
fn sample_once(
    camera: &mut Camera,
    detector: &mut dyn FaceDetector,
    mut embedder: Option<&mut Box<dyn FaceEmbedder>>,
    mirror: bool,
    seq: u64,
) -> Result<CameraSample, Box<dyn std::error::Error>> {
    let raw = camera.frame()?;
    let decoded = raw.decode_image::<RgbFormat>()?;
    let rgb = if mirror {
        image::imageops::flip_horizontal(&decoded)
    } else {
        decoded
    };
    let (width, height) = rgb.dimensions();
    let frame = Frame::new(rgb.into_raw(), width, height, seq);

    // A failed model call must not kill the loop: log and publish a clean
    // sample with the score reset.
    let mut detection = match detector.detect_single(&frame) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("face detection failed: {e}");
            None
        }
    };

    if let (Some(det), Some(emb)) = (detection.as_mut(), embedder.as_deref_mut()) {
        match emb.embed(&frame, &det.bbox) {
            Ok(descriptor) => det.descriptor = Some(descriptor),
            Err(e) => log::warn!("descriptor extraction failed: {e}"),
        }
    }

    let (preview_rgba, preview_width, preview_height) = compose_preview(&frame, detection.as_ref());
    let score = detection.as_ref().map(|d| d.score).unwrap_or(0.0);

    Ok(CameraSample {
        frame,
        preview_rgba,
        preview_width,
        preview_height,
        detection,
        score,
    })
}

/// Scale the frame to the preview width and draw the overlay, rescaled to
/// the preview's dimensions. No detection means a clean preview.
fn compose_preview(frame: &Frame, detection: Option<&Detection>) -> (Vec<u8>, u32, u32) {
    let preview_width = PREVIEW_WIDTH.min(frame.width().max(1));
    let preview_height =
        ((frame.height() as u64 * preview_width as u64) / frame.width().max(1) as u64).max(1) as u32;

    let resized = image::imageops::resize(
        &frame.to_rgb_image(),
        preview_width,
        preview_height,
        image::imageops::FilterType::Triangle,
    );
    let mut preview = image::DynamicImage::ImageRgb8(resized).into_rgba8();

    if let Some(det) = detection {
        let scaled = det.scaled_to(
            (frame.width(), frame.height()),
            (preview_width, preview_height),
        );
        overlay::draw_detection(&mut preview, &scaled);
    }

    (preview.into_raw(), preview_width, preview_height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapmatte_core::shared::detection::{BoundingBox, Point};

    fn solid_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::new(vec![value; (w * h * 3) as usize], w, h, 0)
    }

    #[test]
    fn test_compose_preview_scales_to_preview_width() {
        let frame = solid_frame(1280, 720, 40);
        let (rgba, w, h) = compose_preview(&frame, None);
        assert_eq!(w, PREVIEW_WIDTH);
        assert_eq!(h, 360);
        assert_eq!(rgba.len(), (w * h * 4) as usize);
    }

    #[test]
    fn test_compose_preview_never_upscales() {
        let frame = solid_frame(320, 240, 40);
        let (_, w, h) = compose_preview(&frame, None);
        assert_eq!(w, 320);
        assert_eq!(h, 240);
    }

    #[test]
    fn test_compose_preview_draws_overlay_scaled() {
        let frame = solid_frame(1280, 720, 0);
        let det = Detection {
            bbox: BoundingBox {
                x: 640.0,
                y: 360.0,
                width: 200.0,
                height: 200.0,
            },
            landmarks: vec![Point { x: 700.0, y: 400.0 }],
            descriptor: None,
            score: 0.9,
        };
        let (rgba, w, _) = compose_preview(&frame, Some(&det));
        // Box top-left lands at (320, 180) in the half-sized preview.
        let off = ((180 * w + 320) * 4) as usize;
        assert_eq!(&rgba[off..off + 4], &[0, 118, 255, 255]);
    }

    #[test]
    fn test_compose_preview_without_detection_is_clean() {
        let frame = solid_frame(640, 480, 7);
        let (rgba, _, _) = compose_preview(&frame, None);
        assert!(rgba.chunks(4).all(|p| p == [7, 7, 7, 255]));
    }
}
