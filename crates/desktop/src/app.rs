use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use iced::widget::{button, column, container, pick_list, row, text, toggler};
use iced::{Alignment, Element, Length, Subscription, Task, Theme};

use snapmatte_core::capture::capture_photo_use_case::ProcessedImage;
use snapmatte_core::shared::constants::CAPTURE_MIN_SCORE;
use snapmatte_core::shared::frame::Frame;

use crate::settings::{Appearance, Settings};
use crate::theme;
use crate::workers::camera_worker::{self, CameraMessage};
use crate::workers::capture_worker::{self, CaptureMessage};
use crate::workers::model_cache::ModelCache;

const TICK_INTERVAL_MS: u64 = 50;

// ---------------------------------------------------------------------------
// Processing state
// ---------------------------------------------------------------------------

/// Lifecycle of the capture pipeline. `Loading` is the only state that
/// blocks a new capture; it always resolves to `Ready` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

impl ProcessingState {
    fn is_loading(&self) -> bool {
        matches!(self, ProcessingState::Loading)
    }
}

// ---------------------------------------------------------------------------
// Device choice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceChoice {
    pub index: u32,
    pub name: String,
}

impl std::fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    CapturePressed,
    ExportPressed,
    ExportFinished(Option<String>),
    DeviceSelected(DeviceChoice),
    MirrorToggled(bool),
    AppearanceChanged(Appearance),
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    settings: Settings,
    devices: Vec<DeviceChoice>,
    model_cache: Arc<ModelCache>,

    camera_rx: Option<Receiver<CameraMessage>>,
    camera_stop: Option<Arc<AtomicBool>>,
    camera_error: Option<String>,
    camera_started: bool,
    download_progress: Option<(u64, u64)>,

    preview: Option<iced::widget::image::Handle>,
    latest_frame: Option<Frame>,
    score: f32,

    processing: ProcessingState,
    capture_rx: Option<Receiver<CaptureMessage>>,
    result: Option<ProcessedImage>,
    result_handle: Option<iced::widget::image::Handle>,
    export_status: Option<String>,
}

impl App {
    pub fn new() -> (Self, Task<Message>) {
        let settings = Settings::load();
        let devices = camera_worker::list_devices()
            .map(|list| {
                list.into_iter()
                    .map(|(index, name)| DeviceChoice { index, name })
                    .collect()
            })
            .unwrap_or_else(|e| {
                log::warn!("device enumeration failed: {e}");
                Vec::new()
            });

        let model_cache = ModelCache::new();
        let (camera_rx, camera_stop) =
            camera_worker::spawn(settings.device_index, settings.mirror_preview, model_cache.clone());

        (
            Self {
                settings,
                devices,
                model_cache,
                camera_rx: Some(camera_rx),
                camera_stop: Some(camera_stop),
                camera_error: None,
                camera_started: false,
                download_progress: None,
                preview: None,
                latest_frame: None,
                score: 0.0,
                processing: ProcessingState::Idle,
                capture_rx: None,
                result: None,
                result_handle: None,
                export_status: None,
            },
            Task::none(),
        )
    }

    /// The capture button is enabled only while a frame with a confident
    /// detection is live and no capture is in flight.
    pub fn can_capture(&self) -> bool {
        self.latest_frame.is_some()
            && self.score >= CAPTURE_MIN_SCORE
            && !self.processing.is_loading()
    }

    /// Start a capture if allowed: snapshot the live frame, discard any
    /// previous result, and enter `Loading`. Returns the frame to process.
    fn begin_capture(&mut self) -> Option<Frame> {
        if !self.can_capture() {
            return None;
        }
        let frame = self.latest_frame.clone()?;
        self.processing = ProcessingState::Loading;
        self.result = None;
        self.result_handle = None;
        self.export_status = None;
        Some(frame)
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                self.drain_camera();
                self.drain_capture();
            }
            Message::CapturePressed => {
                if let Some(frame) = self.begin_capture() {
                    self.capture_rx = Some(capture_worker::spawn(frame, self.model_cache.clone()));
                }
            }
            Message::ExportPressed => {
                if let Some(result) = &self.result {
                    let png = result.png.clone();
                    return Task::perform(
                        async move {
                            let Some(handle) = rfd::AsyncFileDialog::new()
                                .set_title("Save photo as")
                                .add_filter("PNG Image", &["png"])
                                .set_file_name("snapmatte.png")
                                .save_file()
                                .await
                            else {
                                return None;
                            };
                            std::fs::write(handle.path(), &png)
                                .err()
                                .map(|e| e.to_string())
                        },
                        Message::ExportFinished,
                    );
                }
            }
            Message::ExportFinished(error) => {
                self.export_status = match error {
                    None => Some("Saved".to_string()),
                    Some(e) => {
                        log::error!("export failed: {e}");
                        Some(format!("Export failed: {e}"))
                    }
                };
            }
            Message::DeviceSelected(choice) => {
                if choice.index != self.settings.device_index {
                    self.settings.device_index = choice.index;
                    self.settings.save();
                    self.restart_camera();
                }
            }
            Message::MirrorToggled(enabled) => {
                self.settings.mirror_preview = enabled;
                self.settings.save();
                self.restart_camera();
            }
            Message::AppearanceChanged(appearance) => {
                self.settings.appearance = appearance;
                self.settings.save();
            }
        }
        Task::none()
    }

    fn restart_camera(&mut self) {
        if let Some(stop) = self.camera_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
        self.camera_error = None;
        self.camera_started = false;
        self.preview = None;
        self.latest_frame = None;
        self.score = 0.0;
        let (rx, stop) = camera_worker::spawn(
            self.settings.device_index,
            self.settings.mirror_preview,
            self.model_cache.clone(),
        );
        self.camera_rx = Some(rx);
        self.camera_stop = Some(stop);
    }

    fn drain_camera(&mut self) {
        let Some(rx) = &self.camera_rx else {
            return;
        };
        let mut messages = Vec::new();
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(msg) => messages.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        for msg in messages {
            self.apply_camera_message(msg);
        }
        if disconnected {
            // A worker that died without a terminal Error message must not
            // leave a stale frame holding the capture gate open.
            self.camera_rx = None;
            self.latest_frame = None;
            self.score = 0.0;
            if self.camera_error.is_none() && self.camera_started {
                self.camera_error = Some("Camera stopped unexpectedly".to_string());
            }
        }
    }

    fn apply_camera_message(&mut self, message: CameraMessage) {
        match message {
            CameraMessage::DownloadProgress(dl, total) => {
                self.download_progress = Some((dl, total));
            }
            CameraMessage::Started { width, height } => {
                log::info!("camera started at {width}x{height}");
                self.camera_started = true;
                self.download_progress = None;
            }
            CameraMessage::Sample(sample) => {
                self.preview = Some(iced::widget::image::Handle::from_rgba(
                    sample.preview_width,
                    sample.preview_height,
                    sample.preview_rgba,
                ));
                self.latest_frame = Some(sample.frame);
                // The score always reflects the latest sample; a frame
                // without a detection resets it to zero.
                self.score = sample.score;
            }
            CameraMessage::SampleFailed => {
                // The last good frame is stale; close the capture gate
                // until a fresh sample arrives.
                self.latest_frame = None;
                self.score = 0.0;
            }
            CameraMessage::Error(e) => {
                log::error!("camera worker: {e}");
                self.camera_error = Some(e);
                self.latest_frame = None;
                self.score = 0.0;
            }
        }
    }

    fn drain_capture(&mut self) {
        let Some(rx) = &self.capture_rx else {
            return;
        };
        let mut messages = Vec::new();
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(msg) => messages.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        for msg in messages {
            self.apply_capture_message(msg);
        }
        if disconnected {
            self.capture_rx = None;
            // A worker that died without a terminal message must not leave
            // the UI stuck at Loading.
            if self.processing.is_loading() {
                self.processing =
                    ProcessingState::Failed("Processing stopped unexpectedly".to_string());
            }
        }
    }

    fn apply_capture_message(&mut self, message: CaptureMessage) {
        match message {
            CaptureMessage::DownloadProgress(dl, total) => {
                self.download_progress = Some((dl, total));
            }
            CaptureMessage::Done(image) => {
                self.download_progress = None;
                self.result_handle = Some(iced::widget::image::Handle::from_rgba(
                    image.width,
                    image.height,
                    image.rgba.clone(),
                ));
                self.result = Some(image);
                self.processing = ProcessingState::Ready;
                self.capture_rx = None;
            }
            CaptureMessage::Error(e) => {
                self.download_progress = None;
                self.processing = ProcessingState::Failed(e);
                self.capture_rx = None;
            }
        }
    }

    pub fn view(&self) -> Element<'_, Message> {
        let preview: Element<'_, Message> = if let Some(error) = &self.camera_error {
            text(format!("Camera error: {error}")).size(14).into()
        } else if let Some(handle) = &self.preview {
            iced::widget::image(handle.clone())
                .width(Length::Fill)
                .into()
        } else {
            let label = match self.download_progress {
                Some((dl, total)) if total > 0 => format!(
                    "Downloading models\u{2026} {} / {} MB",
                    dl / 1_000_000,
                    total / 1_000_000
                ),
                _ => "Starting camera\u{2026}".to_string(),
            };
            text(label).size(14).into()
        };

        let score_label = text(format!("Face confidence: {:.0}%", self.score * 100.0)).size(13);

        let capture_button = button(text("Capture").size(14))
            .padding([8, 24])
            .on_press_maybe(self.can_capture().then_some(Message::CapturePressed));

        let status: Element<'_, Message> = match &self.processing {
            ProcessingState::Idle => text("").into(),
            ProcessingState::Loading => text("Removing background\u{2026}").size(13).into(),
            ProcessingState::Ready => text("Done").size(13).into(),
            ProcessingState::Failed(e) => text(format!("Failed: {e}")).size(13).into(),
        };

        let result: Element<'_, Message> = if let Some(handle) = &self.result_handle {
            let export = button(text("Save PNG").size(13))
                .padding([6, 16])
                .on_press(Message::ExportPressed);
            let mut col = column![
                iced::widget::image(handle.clone()).width(Length::Fill),
                export,
            ]
            .spacing(8)
            .align_x(Alignment::Center);
            if let Some(status) = &self.export_status {
                col = col.push(text(status.clone()).size(12));
            }
            col.into()
        } else {
            column![].into()
        };

        let selected_device = self
            .devices
            .iter()
            .find(|d| d.index == self.settings.device_index)
            .cloned();
        let device_picker = pick_list(
            self.devices.clone(),
            selected_device,
            Message::DeviceSelected,
        )
        .placeholder("No camera found")
        .text_size(13);

        let mirror_toggle = toggler(self.settings.mirror_preview)
            .label("Mirror preview")
            .text_size(13)
            .on_toggle(Message::MirrorToggled);

        let appearance_picker = pick_list(
            Appearance::ALL,
            Some(self.settings.appearance),
            Message::AppearanceChanged,
        )
        .text_size(13);

        let controls = row![device_picker, mirror_toggle, appearance_picker]
            .spacing(16)
            .align_y(Alignment::Center);

        container(
            column![
                preview,
                row![score_label, capture_button, status]
                    .spacing(16)
                    .align_y(Alignment::Center),
                result,
                controls,
            ]
            .spacing(12)
            .align_x(Alignment::Center),
        )
        .padding(16)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }

    pub fn theme(&self) -> Theme {
        theme::resolve_theme(self.settings.appearance)
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(Duration::from_millis(TICK_INTERVAL_MS)).map(|_| Message::Tick)
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(stop) = &self.camera_stop {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::camera_worker::CameraSample;
    use rstest::rstest;

    fn test_instance() -> App {
        App {
            settings: Settings::default(),
            devices: Vec::new(),
            model_cache: Arc::new(ModelCache::idle()),
            camera_rx: None,
            camera_stop: None,
            camera_error: None,
            camera_started: false,
            download_progress: None,
            preview: None,
            latest_frame: None,
            score: 0.0,
            processing: ProcessingState::Idle,
            capture_rx: None,
            result: None,
            result_handle: None,
            export_status: None,
        }
    }

    fn sample(score: f32) -> CameraSample {
        CameraSample {
            frame: Frame::new(vec![0; 4 * 4 * 3], 4, 4, 0),
            preview_rgba: vec![0; 4 * 4 * 4],
            preview_width: 4,
            preview_height: 4,
            detection: None,
            score,
        }
    }

    fn processed(seq: u8) -> ProcessedImage {
        ProcessedImage {
            width: 2,
            height: 2,
            rgba: vec![seq; 2 * 2 * 4],
            png: vec![seq],
        }
    }

    #[rstest]
    #[case(0.74, false)]
    #[case(0.75, true)]
    #[case(0.76, true)]
    fn test_capture_enabled_exactly_at_threshold(#[case] score: f32, #[case] enabled: bool) {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(score)));
        assert_eq!(app.can_capture(), enabled);
    }

    #[test]
    fn test_capture_disabled_without_frame() {
        let mut app = test_instance();
        app.score = 0.9;
        assert!(!app.can_capture());
    }

    #[test]
    fn test_capture_disabled_while_loading() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        assert!(app.begin_capture().is_some());
        assert_eq!(app.processing, ProcessingState::Loading);
        assert!(!app.can_capture());
        assert!(app.begin_capture().is_none());
    }

    #[test]
    fn test_score_resets_on_frame_without_detection() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        assert!(app.can_capture());
        app.apply_camera_message(CameraMessage::Sample(sample(0.0)));
        assert!(!app.can_capture());
        assert!((app.score - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_capture_done_resolves_to_ready() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        app.begin_capture();
        app.apply_capture_message(CaptureMessage::Done(processed(1)));
        assert_eq!(app.processing, ProcessingState::Ready);
        assert!(app.result.is_some());
        // Capture is allowed again once Loading has resolved.
        assert!(app.can_capture());
    }

    #[test]
    fn test_capture_error_resolves_to_failed() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        app.begin_capture();
        app.apply_capture_message(CaptureMessage::Error("model failed".to_string()));
        assert_eq!(
            app.processing,
            ProcessingState::Failed("model failed".to_string())
        );
        assert!(app.result.is_none());
        assert!(app.can_capture());
    }

    #[test]
    fn test_new_capture_discards_previous_result() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        app.begin_capture();
        app.apply_capture_message(CaptureMessage::Done(processed(1)));
        assert!(app.result.is_some());

        app.begin_capture();
        assert!(app.result.is_none());
        assert!(app.result_handle.is_none());
        assert_eq!(app.processing, ProcessingState::Loading);
    }

    #[test]
    fn test_worker_disconnect_while_loading_resolves_to_failed() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        app.begin_capture();

        // A channel whose sender is dropped without a terminal message.
        let (tx, rx) = crossbeam_channel::unbounded::<CaptureMessage>();
        drop(tx);
        app.capture_rx = Some(rx);
        app.drain_capture();

        assert!(matches!(app.processing, ProcessingState::Failed(_)));
        assert!(app.capture_rx.is_none());
    }

    #[test]
    fn test_camera_disconnect_disables_capture() {
        let mut app = test_instance();
        app.camera_started = true;
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        assert!(app.can_capture());

        // The worker died without sending a terminal Error message.
        let (tx, rx) = crossbeam_channel::unbounded::<CameraMessage>();
        drop(tx);
        app.camera_rx = Some(rx);
        app.drain_camera();

        assert!(!app.can_capture());
        assert!(app.latest_frame.is_none());
        assert!((app.score - 0.0).abs() < f32::EPSILON);
        assert!(app.camera_error.is_some());
        assert!(app.camera_rx.is_none());
    }

    #[test]
    fn test_failed_sample_closes_capture_gate() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        assert!(app.can_capture());

        app.apply_camera_message(CameraMessage::SampleFailed);
        assert!(!app.can_capture());
        assert!((app.score - 0.0).abs() < f32::EPSILON);

        // A fresh sample reopens the gate.
        app.apply_camera_message(CameraMessage::Sample(sample(0.8)));
        assert!(app.can_capture());
    }

    #[test]
    fn test_camera_error_disables_capture() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        app.apply_camera_message(CameraMessage::Error("device unplugged".to_string()));
        assert!(!app.can_capture());
        assert_eq!(app.camera_error.as_deref(), Some("device unplugged"));
    }

    #[test]
    fn test_download_progress_cleared_when_camera_starts() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::DownloadProgress(10, 100));
        assert_eq!(app.download_progress, Some((10, 100)));
        app.apply_camera_message(CameraMessage::Started {
            width: 640,
            height: 480,
        });
        assert!(app.download_progress.is_none());
    }

    #[test]
    fn test_capture_failure_keeps_detection_loop_state() {
        let mut app = test_instance();
        app.apply_camera_message(CameraMessage::Sample(sample(0.9)));
        app.begin_capture();
        app.apply_capture_message(CaptureMessage::Error("boom".to_string()));
        // The live frame and score survive a failed capture.
        app.apply_camera_message(CameraMessage::Sample(sample(0.8)));
        assert!(app.can_capture());
    }
}
