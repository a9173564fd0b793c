use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};

use camwatch::alert::{AlertDispatcher, MemoryBroker};
use camwatch::config::{CameraConfig, SupervisorSettings};
use camwatch::detect::{
    Detector, DetectorFactory, StubDetectorFactory, UnavailableDetectorFactory,
};
use camwatch::frame::{Frame, StreamProperties};
use camwatch::ingest::{CaptureFactory, CaptureSource, DefaultCaptureFactory, SourceDescriptor};
use camwatch::publish::MemorySinkFactory;
use camwatch::{
    Capabilities, CameraSupervisor, DetectionResult, StopToken, SupervisorState, WorkerRegistry,
};

fn fast_caps(
    capture: Arc<dyn CaptureFactory>,
    detector: Arc<dyn DetectorFactory>,
    broker: Option<MemoryBroker>,
) -> Capabilities {
    let routing = move |_: &CameraConfig| match &broker {
        Some(broker) => AlertDispatcher::new().with_broker(Arc::new(broker.clone()), "alerts", "faces"),
        None => AlertDispatcher::new(),
    };
    Capabilities::new(
        capture,
        detector,
        Arc::new(MemorySinkFactory::default()),
        Arc::new(routing),
    )
    .with_frame_pacing(Duration::ZERO)
    .with_settings(SupervisorSettings {
        backoff_initial: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
    })
}

fn stub_camera(id: &str, uri: &str) -> CameraConfig {
    CameraConfig::new(id, SourceDescriptor::Live(uri.to_string()))
}

#[test]
fn ten_frame_source_with_cap_of_five_stops_cleanly() {
    let mut camera = stub_camera("smoke", "stub://smoke?frames=10");
    camera.max_frames = 5;
    camera.skip_frames = 0;
    camera.min_confidence = 0.2;

    let caps = fast_caps(
        Arc::new(DefaultCaptureFactory),
        Arc::new(StubDetectorFactory::default()),
        None,
    );
    let mut registry = WorkerRegistry::start(vec![camera], &caps).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !registry.all_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let summaries = registry.join_all();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].processed, 5);
    assert_eq!(summaries[0].errors, 0);
    assert_eq!(registry.is_running("smoke"), Some(false));
    assert_eq!(registry.state("smoke"), Some(SupervisorState::Stopped));
}

/// Frame `i` (1-based) is filled with the value `i`.
struct CountingSource {
    next: u8,
    limit: u8,
    open: Arc<AtomicUsize>,
}

impl CaptureSource for CountingSource {
    fn properties(&self) -> StreamProperties {
        StreamProperties {
            width: 4,
            height: 4,
            fps: 30,
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.limit {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(Frame::filled(4, 4, self.next)))
    }
}

impl Drop for CountingSource {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingCapture {
    limit: u8,
    opens: AtomicUsize,
    open: Arc<AtomicUsize>,
    peak_open: AtomicUsize,
}

impl CaptureFactory for CountingCapture {
    fn open(&self, _source: &SourceDescriptor) -> Result<Box<dyn CaptureSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open.fetch_max(now_open, Ordering::SeqCst);
        Ok(Box::new(CountingSource {
            next: 0,
            limit: self.limit,
            open: self.open.clone(),
        }))
    }
}

/// Records the fill value of every frame it is asked to inspect.
#[derive(Clone, Default)]
struct RecordingDetectorFactory {
    seen: Arc<Mutex<Vec<u8>>>,
}

struct RecordingDetector {
    seen: Arc<Mutex<Vec<u8>>>,
}

impl Detector for RecordingDetector {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        self.seen.lock().unwrap().push(frame.as_bytes()[0]);
        Ok(DetectionResult::empty())
    }
}

impl DetectorFactory for RecordingDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>> {
        Ok(Box::new(RecordingDetector {
            seen: self.seen.clone(),
        }))
    }
}

#[test]
fn skip_two_sends_every_third_frame_to_detector() {
    let detector = RecordingDetectorFactory::default();
    let capture = Arc::new(CountingCapture {
        limit: 9,
        ..CountingCapture::default()
    });
    let mut camera = stub_camera("skip", "counting://");
    camera.skip_frames = 2;
    camera.max_frames = 3;

    let caps = fast_caps(capture, Arc::new(detector.clone()), None);
    let summary = CameraSupervisor::new(camera, &caps, StopToken::new()).run();

    assert_eq!(summary.processed, 3);
    assert_eq!(*detector.seen.lock().unwrap(), vec![3, 6, 9]);
}

#[test]
fn frame_index_restarts_after_reconnect() {
    let detector = RecordingDetectorFactory::default();
    let capture = Arc::new(CountingCapture {
        limit: 4,
        ..CountingCapture::default()
    });
    let mut camera = stub_camera("restart", "counting://");
    camera.skip_frames = 1;
    camera.max_frames = 4;

    let caps = fast_caps(capture.clone(), Arc::new(detector.clone()), None);
    let summary = CameraSupervisor::new(camera, &caps, StopToken::new()).run();

    // Each 4-frame session yields frames 2 and 4, then ends with an error.
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.errors, 1);
    assert_eq!(*detector.seen.lock().unwrap(), vec![2, 4, 2, 4]);
    assert_eq!(capture.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn at_most_one_capture_handle_is_open() {
    let capture = Arc::new(CountingCapture {
        limit: 2,
        ..CountingCapture::default()
    });
    let mut camera = stub_camera("handles", "counting://");
    camera.max_frames = 7;

    let caps = fast_caps(
        capture.clone(),
        Arc::new(StubDetectorFactory::default()),
        None,
    );
    let summary = CameraSupervisor::new(camera, &caps, StopToken::new()).run();

    assert_eq!(summary.processed, 7);
    assert_eq!(capture.opens.load(Ordering::SeqCst), 4);
    assert_eq!(capture.peak_open.load(Ordering::SeqCst), 1);
    assert_eq!(capture.open.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct FailingCapture {
    attempts: Mutex<Vec<Instant>>,
}

impl CaptureFactory for FailingCapture {
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn CaptureSource>> {
        self.attempts.lock().unwrap().push(Instant::now());
        bail!("connection refused: {}", source)
    }
}

#[test]
fn reconnect_attempts_back_off_exponentially() {
    let capture = Arc::new(FailingCapture::default());
    let caps = fast_caps(
        capture.clone(),
        Arc::new(StubDetectorFactory::default()),
        None,
    );
    let stop = StopToken::new();
    let supervisor = CameraSupervisor::new(stub_camera("down", "rtsp://down"), &caps, stop.clone());
    let handle = thread::spawn(move || supervisor.run());

    let deadline = Instant::now() + Duration::from_secs(10);
    while capture.attempts.lock().unwrap().len() < 6 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    stop.stop();
    let summary = handle.join().unwrap();

    let attempts = capture.attempts.lock().unwrap().clone();
    assert!(attempts.len() >= 6);
    let expected_ms = [5u64, 10, 20, 20, 20];
    for (gap, expected) in attempts.windows(2).zip(expected_ms) {
        assert!(gap[1] - gap[0] >= Duration::from_millis(expected));
    }
    assert_eq!(summary.processed, 0);
    assert!(summary.errors >= 6);
}

#[test]
fn stop_during_backoff_is_observed_promptly() {
    let capture = Arc::new(FailingCapture::default());
    let caps = fast_caps(
        capture.clone(),
        Arc::new(StubDetectorFactory::default()),
        None,
    )
    .with_settings(SupervisorSettings {
        backoff_initial: Duration::from_secs(30),
        backoff_max: Duration::from_secs(60),
    });
    let stop = StopToken::new();
    let supervisor = CameraSupervisor::new(stub_camera("slow", "rtsp://slow"), &caps, stop.clone());
    let state = supervisor.state_cell();
    let handle = thread::spawn(move || supervisor.run());

    let deadline = Instant::now() + Duration::from_secs(5);
    while state.get() != SupervisorState::Error && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    let stopped_at = Instant::now();
    stop.stop();
    let summary = handle.join().unwrap();

    assert!(stopped_at.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.errors, 1);
    assert_eq!(state.get(), SupervisorState::Stopped);
}

#[test]
fn failed_detector_load_keeps_streaming_without_alerts() {
    let broker = MemoryBroker::default();
    let mut camera = stub_camera("nodetect", "stub://nodetect?frames=0");
    camera.max_frames = 6;
    let caps = fast_caps(
        Arc::new(DefaultCaptureFactory),
        Arc::new(UnavailableDetectorFactory::new("model missing")),
        Some(broker.clone()),
    );

    let summary = CameraSupervisor::new(camera, &caps, StopToken::new()).run();

    assert_eq!(summary.processed, 6);
    assert_eq!(summary.errors, 0);
    assert!(broker.published().is_empty());
}

struct ExplodingDetectorFactory;

struct ExplodingDetector;

impl Detector for ExplodingDetector {
    fn name(&self) -> &'static str {
        "exploding"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        Err(anyhow!("inference backend crashed"))
    }
}

impl DetectorFactory for ExplodingDetectorFactory {
    fn load(&self) -> Result<Box<dyn Detector>> {
        Ok(Box::new(ExplodingDetector))
    }
}

#[test]
fn per_frame_failure_is_a_stream_error() {
    let caps = fast_caps(
        Arc::new(DefaultCaptureFactory),
        Arc::new(ExplodingDetectorFactory),
        None,
    );
    let stop = StopToken::new();
    let supervisor = CameraSupervisor::new(stub_camera("boom", "stub://boom"), &caps, stop.clone());
    let handle = thread::spawn(move || supervisor.run());
    thread::sleep(Duration::from_millis(60));
    stop.stop();
    let summary = handle.join().unwrap();

    assert_eq!(summary.processed, 0);
    assert!(summary.errors >= 2);
}

#[test]
fn bright_frames_raise_one_alert_each() {
    let broker = MemoryBroker::default();
    let mut camera = stub_camera("alerts", "stub://alerts?frames=0&width=32&height=24");
    camera.max_frames = 10;
    camera.min_confidence = 0.2;
    let caps = fast_caps(
        Arc::new(DefaultCaptureFactory),
        Arc::new(StubDetectorFactory::default()),
        Some(broker.clone()),
    );

    let summary = CameraSupervisor::new(camera, &caps, StopToken::new()).run();

    assert_eq!(summary.processed, 10);
    let published = broker.published();
    assert_eq!(published.len(), 5);
    let alert: camwatch::Alert = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(alert.camera_id, "alerts");
    assert_eq!(alert.faces, 1);
    assert!(!alert.snapshot_b64.is_empty());
}

#[test]
fn confidence_threshold_filters_stub_detections() {
    let broker = MemoryBroker::default();
    let mut camera = stub_camera("strict", "stub://strict?frames=0&width=16&height=16");
    camera.max_frames = 4;
    camera.min_confidence = 0.95;
    let caps = fast_caps(
        Arc::new(DefaultCaptureFactory),
        Arc::new(StubDetectorFactory { confidence: 0.9 }),
        Some(broker.clone()),
    );

    CameraSupervisor::new(camera, &caps, StopToken::new()).run();
    assert!(broker.published().is_empty());
}
