//! Periodic capture-and-detect loop.
//!
//! A ticker thread fires every `interval`; a worker thread captures a frame,
//! runs detection and publishes the result. A tick that arrives while the
//! previous frame is still in flight is dropped, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::Detection;
use crate::error::Result;
use crate::ingest::FrameSource;
use crate::service::DetectionService;
use crate::storage::PredictionStore;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Anything that can turn encoded image bytes into detections.
pub trait FrameDetector: Send + Sync {
    fn detect(&self, bytes: &[u8]) -> Result<Vec<Detection>>;
}

impl<S: PredictionStore> FrameDetector for DetectionService<S> {
    fn detect(&self, bytes: &[u8]) -> Result<Vec<Detection>> {
        DetectionService::detect(self, bytes)
    }
}

/// What the live view currently shows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveState {
    pub detections: Vec<Detection>,
    pub fps: u32,
    /// Frames the source has handed out, including ones whose detection failed.
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub ticks_skipped: u64,
    pub errors: u64,
}

/// Counts captured frames per window of at least one second.
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    /// Record one captured frame. Returns the new rate when a window closes.
    pub fn record(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            let fps = self.frames;
            self.frames = 0;
            self.window_start = now;
            Some(fps)
        } else {
            None
        }
    }
}

struct Shared {
    state: Mutex<LiveState>,
    busy: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running live loop. Dropping it stops the loop.
pub struct LiveDetector {
    shared: Arc<Shared>,
    stop_tx: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl LiveDetector {
    /// Start capturing from `source` every `interval`.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        detector: Arc<dyn FrameDetector>,
        interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(LiveState::default()),
            busy: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (tick_tx, tick_rx) = mpsc::channel::<()>();

        log::info!(
            "live detection started on {} every {:?}",
            source.describe(),
            interval
        );

        let ticker_shared = Arc::clone(&shared);
        let ticker = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if ticker_shared
                        .busy
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        if tick_tx.send(()).is_err() {
                            break;
                        }
                    } else {
                        ticker_shared.state().ticks_skipped += 1;
                    }
                }
                // Stop requested or handle dropped.
                _ => break,
            }
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || {
            let mut fps = FpsCounter::new(Instant::now());
            while tick_rx.recv().is_ok() {
                process_frame(source.as_mut(), detector.as_ref(), &worker_shared, &mut fps);
                worker_shared.busy.store(false, Ordering::Release);
            }
        });

        Self {
            shared,
            stop_tx: Some(stop_tx),
            ticker: Some(ticker),
            worker: Some(worker),
        }
    }

    pub fn snapshot(&self) -> LiveState {
        self.shared.state().clone()
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Cancel the timer, wait for any in-flight frame and clear the view.
    pub fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(());
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                log::error!("live ticker thread panicked");
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("live worker thread panicked");
            }
        }
        let mut state = self.shared.state();
        state.detections.clear();
        state.fps = 0;
        log::info!(
            "live detection stopped after {} frame(s), {} skipped tick(s), {} error(s)",
            state.frames_processed,
            state.ticks_skipped,
            state.errors
        );
    }
}

impl Drop for LiveDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn process_frame(
    source: &mut dyn FrameSource,
    detector: &dyn FrameDetector,
    shared: &Shared,
    fps: &mut FpsCounter,
) {
    let frame = match source.capture() {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("frame capture failed: {}", e);
            shared.state().errors += 1;
            return;
        }
    };
    {
        let rate = fps.record(Instant::now());
        let mut state = shared.state();
        state.frames_captured = source.frames_captured();
        if let Some(rate) = rate {
            state.fps = rate;
        }
    }
    match detector.detect(&frame.bytes) {
        Ok(detections) => {
            let mut state = shared.state();
            log::debug!("{}: {} detection(s)", frame.uri, detections.len());
            state.detections = detections;
            state.frames_processed += 1;
        }
        Err(e) => {
            log::warn!("live detection failed for {}: {}", frame.uri, e);
            shared.state().errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::error::DetectError;
    use crate::ingest::CapturedFrame;
    use std::sync::atomic::AtomicU64;

    struct CountingSource {
        captured: u64,
    }

    impl FrameSource for CountingSource {
        fn capture(&mut self) -> Result<CapturedFrame> {
            self.captured += 1;
            Ok(CapturedFrame {
                uri: format!("test://{}", self.captured),
                bytes: vec![0u8; 4],
            })
        }

        fn describe(&self) -> String {
            "counting".into()
        }

        fn frames_captured(&self) -> u64 {
            self.captured
        }
    }

    struct SlowDetector {
        delay: Duration,
        calls: AtomicU64,
        fail: bool,
    }

    impl FrameDetector for SlowDetector {
        fn detect(&self, _bytes: &[u8]) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(DetectError::Inference("boom".into()));
            }
            Ok(vec![Detection {
                class_name: "durian".into(),
                confidence: 0.9,
                bounding_box: BoundingBox {
                    x: 1.0,
                    y: 1.0,
                    width: 2.0,
                    height: 2.0,
                },
            }])
        }
    }

    fn detector(delay_ms: u64, fail: bool) -> Arc<SlowDetector> {
        Arc::new(SlowDetector {
            delay: Duration::from_millis(delay_ms),
            calls: AtomicU64::new(0),
            fail,
        })
    }

    #[test]
    fn fps_counter_reports_once_per_window() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new(t0);
        for i in 1..10 {
            assert_eq!(fps.record(t0 + Duration::from_millis(i * 100)), None);
        }
        assert_eq!(fps.record(t0 + Duration::from_millis(1000)), Some(10));
        assert_eq!(fps.record(t0 + Duration::from_millis(1100)), None);
    }

    #[test]
    fn slow_frames_skip_ticks_instead_of_queueing() {
        let det = detector(60, false);
        let mut live = LiveDetector::start(
            Box::new(CountingSource { captured: 0 }),
            det.clone(),
            Duration::from_millis(10),
        );
        std::thread::sleep(Duration::from_millis(400));
        live.stop();
        let state = live.snapshot();
        assert!(state.ticks_skipped > 0);
        // At most one frame in flight at a time: calls bounded by elapsed / delay.
        assert!(det.calls.load(Ordering::SeqCst) <= 400 / 60 + 2);
        assert!(state.frames_processed >= 1);
    }

    #[test]
    fn stop_clears_displayed_state() {
        let det = detector(0, false);
        let mut live = LiveDetector::start(
            Box::new(CountingSource { captured: 0 }),
            det,
            Duration::from_millis(5),
        );
        std::thread::sleep(Duration::from_millis(100));
        assert!(live.is_running());
        live.stop();
        assert!(!live.is_running());
        let state = live.snapshot();
        assert!(state.detections.is_empty());
        assert_eq!(state.fps, 0);
        assert!(state.frames_processed > 0);

        let processed = state.frames_processed;
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(live.snapshot().frames_processed, processed);
    }

    #[test]
    fn detection_errors_are_counted_and_loop_continues() {
        let det = detector(0, true);
        let mut live = LiveDetector::start(
            Box::new(CountingSource { captured: 0 }),
            det.clone(),
            Duration::from_millis(5),
        );
        std::thread::sleep(Duration::from_millis(100));
        live.stop();
        let state = live.snapshot();
        assert!(state.errors >= 2);
        assert_eq!(state.frames_processed, 0);
        assert!(state.frames_captured >= 2);
        assert!(det.calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn frame_rate_counts_captures_even_when_detection_fails() {
        let det = detector(0, true);
        let mut live = LiveDetector::start(
            Box::new(CountingSource { captured: 0 }),
            det,
            Duration::from_millis(5),
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        while live.snapshot().fps == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let state = live.snapshot();
        live.stop();
        assert!(state.fps > 0, "fps stayed at zero: {state:?}");
        assert_eq!(state.frames_processed, 0);
    }
}
