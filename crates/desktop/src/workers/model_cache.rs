use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use snapmatte_core::shared::constants::{
    DETECTOR_MODEL_NAME, DETECTOR_MODEL_URL, EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL,
    MATTING_MODEL_NAME, MATTING_MODEL_URL,
};
use snapmatte_core::shared::model_resolver;

/// Shared model cache that resolves weight artifacts in the background at
/// startup. Workers grab pre-resolved paths or wait for resolution to
/// finish.
pub struct ModelCache {
    detector: Arc<ModelSlot>,
    matting: Arc<ModelSlot>,
    embedding: Arc<ModelSlot>,
}

struct ModelSlot {
    result: Mutex<Option<Result<PathBuf, String>>>,
    ready: Condvar,
    progress: Arc<Mutex<(u64, u64)>>,
}

impl ModelCache {
    /// Create a new `ModelCache` and begin resolving models in the
    /// background. The detector resolves first so the preview can start
    /// before the heavier matting model arrives.
    pub fn new() -> Arc<Self> {
        let cache = Arc::new(Self::idle());

        let detector_slot = cache.detector.clone();
        let matting_slot = cache.matting.clone();
        let embedding_slot = cache.embedding.clone();
        thread::spawn(move || {
            detector_slot.resolve(DETECTOR_MODEL_NAME, DETECTOR_MODEL_URL);
            embedding_slot.resolve(EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL);
            matting_slot.resolve(MATTING_MODEL_NAME, MATTING_MODEL_URL);
        });

        cache
    }

    /// A cache with empty slots and no background resolution. Waiting on it
    /// blocks until cancelled; used by tests.
    pub fn idle() -> Self {
        Self {
            detector: Arc::new(ModelSlot::new()),
            matting: Arc::new(ModelSlot::new()),
            embedding: Arc::new(ModelSlot::new()),
        }
    }

    /// Wait for the face-detector model path. Calls
    /// `on_progress(downloaded, total)` while a download is in progress.
    /// Returns early if `cancelled` is set.
    pub fn wait_for_detector(
        &self,
        on_progress: &dyn Fn(u64, u64),
        cancelled: &AtomicBool,
    ) -> Result<PathBuf, String> {
        self.detector.wait(on_progress, cancelled)
    }

    /// Wait for the background-matting model path.
    pub fn wait_for_matting(
        &self,
        on_progress: &dyn Fn(u64, u64),
        cancelled: &AtomicBool,
    ) -> Result<PathBuf, String> {
        self.matting.wait(on_progress, cancelled)
    }

    /// Wait for the face-embedding model path.
    pub fn wait_for_embedding(
        &self,
        on_progress: &dyn Fn(u64, u64),
        cancelled: &AtomicBool,
    ) -> Result<PathBuf, String> {
        self.embedding.wait(on_progress, cancelled)
    }
}

impl ModelSlot {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
            progress: Arc::new(Mutex::new((0, 0))),
        }
    }

    fn resolve(&self, name: &str, url: &str) {
        let progress_mutex = self.progress.clone();
        let result = model_resolver::resolve(
            name,
            url,
            None,
            Some(Box::new(move |downloaded, total| {
                *progress_mutex.lock().unwrap() = (downloaded, total);
            })),
        );
        *self.result.lock().unwrap() = Some(result.map_err(|e| e.to_string()));
        self.ready.notify_all();
    }

    fn wait(
        &self,
        on_progress: &dyn Fn(u64, u64),
        cancelled: &AtomicBool,
    ) -> Result<PathBuf, String> {
        let mut guard = self.result.lock().unwrap();
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err("Cancelled".into());
            }
            if let Some(ref result) = *guard {
                return result.clone();
            }
            // Forward download progress while waiting
            if let Ok(progress) = self.progress.try_lock() {
                let (dl, total) = *progress;
                if total > 0 {
                    on_progress(dl, total);
                }
            }
            let (new_guard, _) = self
                .ready
                .wait_timeout(guard, Duration::from_millis(100))
                .unwrap();
            guard = new_guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_cache_wait_honors_cancellation() {
        let cache = ModelCache::idle();
        let cancelled = AtomicBool::new(true);
        let result = cache.wait_for_detector(&|_, _| {}, &cancelled);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolved_slot_returns_immediately() {
        let slot = ModelSlot::new();
        *slot.result.lock().unwrap() = Some(Ok(PathBuf::from("/tmp/model.onnx")));
        let cancelled = AtomicBool::new(false);
        let result = slot.wait(&|_, _| {}, &cancelled);
        assert_eq!(result.unwrap(), PathBuf::from("/tmp/model.onnx"));
    }

    #[test]
    fn test_failed_slot_reports_error() {
        let slot = ModelSlot::new();
        *slot.result.lock().unwrap() = Some(Err("download failed".into()));
        let cancelled = AtomicBool::new(false);
        let result = slot.wait(&|_, _| {}, &cancelled);
        assert_eq!(result.unwrap_err(), "download failed");
    }
}
