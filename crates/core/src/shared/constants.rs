pub const DETECTOR_MODEL_NAME: &str = "blazeface_short_range.onnx";
pub const DETECTOR_MODEL_URL: &str =
    "https://github.com/snapmatte/snapmatte/releases/download/v0.1.0/blazeface_short_range.onnx";

pub const MATTING_MODEL_NAME: &str = "modnet_photographic_portrait.onnx";
pub const MATTING_MODEL_URL: &str =
    "https://github.com/snapmatte/snapmatte/releases/download/v0.1.0/modnet_photographic_portrait.onnx";

pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const EMBEDDING_MODEL_URL: &str =
    "https://github.com/snapmatte/snapmatte/releases/download/v0.1.0/w600k_r50.onnx";

/// Minimum detection score required to enable capture.
pub const CAPTURE_MIN_SCORE: f32 = 0.75;

/// Cadence of the detection loop, and of the UI tick that drains it.
pub const DETECT_INTERVAL_MS: u64 = 50;

/// Width the live preview is scaled to before the overlay is drawn.
pub const PREVIEW_WIDTH: u32 = 640;
