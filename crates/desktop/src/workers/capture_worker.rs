use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use snapmatte_core::capture::capture_photo_use_case::{CapturePhotoUseCase, ProcessedImage};
use snapmatte_core::segmentation::infrastructure::onnx_modnet_remover::OnnxModnetRemover;
use snapmatte_core::shared::frame::Frame;

use super::model_cache::ModelCache;

/// Messages sent from the capture worker to the UI. Exactly one terminal
/// message is sent per capture, then the channel disconnects.
#[derive(Debug, Clone)]
pub enum CaptureMessage {
    DownloadProgress(u64, u64),
    Done(ProcessedImage),
    Error(String),
}

/// Spawn a one-shot capture worker for the given frame. The capture is not
/// cancellable; it always terminates with `Done` or `Error`.
pub fn spawn(frame: Frame, model_cache: Arc<ModelCache>) -> Receiver<CaptureMessage> {
    let (tx, rx) = crossbeam_channel::unbounded::<CaptureMessage>();

    thread::spawn(move || {
        let result = run_capture(&tx, &frame, &model_cache);
        match result {
            Ok(image) => {
                let _ = tx.send(CaptureMessage::Done(image));
            }
            Err(e) => {
                log::error!("capture failed: {e}");
                let _ = tx.send(CaptureMessage::Error(e));
            }
        }
    });

    rx
}

fn run_capture(
    tx: &Sender<CaptureMessage>,
    frame: &Frame,
    model_cache: &ModelCache,
) -> Result<ProcessedImage, String> {
    let never_cancelled = AtomicBool::new(false);
    let tx_dl = tx.clone();
    let model_path = model_cache.wait_for_matting(
        &|dl, total| {
            let _ = tx_dl.send(CaptureMessage::DownloadProgress(dl, total));
        },
        &never_cancelled,
    )?;

    let remover = OnnxModnetRemover::new(&model_path).map_err(|e| e.to_string())?;
    let mut use_case = CapturePhotoUseCase::new(Box::new(remover));
    use_case.execute(frame).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_no_terminal_message_before_model_resolves() {
        let cache = Arc::new(ModelCache::idle());
        let frame = Frame::new(vec![0; 4 * 4 * 3], 4, 4, 0);

        let rx = spawn(frame, cache);
        // The idle cache never resolves, so the worker is still waiting
        // and the channel stays open without a terminal message.
        let msg = rx.recv_timeout(Duration::from_millis(50));
        assert!(msg.is_err());
    }
}
