//! End-to-end tests of the capture station against the mock camera
//!
//! Every test drives the real pipeline: connect, event pump, classifier,
//! dispatcher, resolver and orchestrator. The only fake is the driver.

use super::fixtures::padded_jpeg;
use super::mock_camera::{MockCamera, MockCameraConfig};
use crate::capture::notifier::CapturedArtifact;
use crate::core::config::Config;
use crate::core::station::CaptureStation;
use crate::device::events::{object_codes, state_codes};
use crate::device::traits::{codes, CreateDisposition};
use crossbeam_channel::Receiver;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::runtime::Runtime;

// =============================================================================
// HARNESS
// =============================================================================

const ARRIVAL: Duration = Duration::from_secs(10);
const QUIET: Duration = Duration::from_millis(250);

/// Station, camera and output folder. Fields drop in declaration order, so
/// the station disconnects before the runtime shuts down.
struct Harness {
    station: CaptureStation,
    camera: Arc<MockCamera>,
    _runtime: Runtime,
    temp: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::build(MockCameraConfig::default(), |_| {})
    }

    fn build(camera_config: MockCameraConfig, configure: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.output.root = temp.path().to_path_buf();
        config.connection.pump_interval_ms = 5;
        config.transfer.base_delay_ms = 1;
        config.transfer.fallback_wait_ms = 500;
        config.transfer.fallback_poll_ms = 5;
        config.thumbnail.enabled = false;
        configure(&mut config);

        let runtime = Runtime::new().unwrap();
        let camera = Arc::new(MockCamera::with_config(camera_config));
        let station = CaptureStation::new(camera.clone(), &config, runtime.handle().clone());
        assert!(station.connect(false).unwrap());

        Self {
            station,
            camera,
            _runtime: runtime,
            temp,
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn part_files(&self, part: &str) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(self.root().join(part)) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    fn settle(&self) {
        thread::sleep(QUIET);
        assert!(self.station.wait_idle(ARRIVAL), "downloads did not finish");
    }

    fn assert_clean(&self) {
        assert!(self.camera.violations().is_empty(), "{:?}", self.camera.violations());
        assert!(self.camera.leaked_items().is_empty(), "{:?}", self.camera.leaked_items());
        assert_eq!(self.camera.open_streams(), 0);
    }
}

fn next(rx: &Receiver<CapturedArtifact>) -> CapturedArtifact {
    rx.recv_timeout(ARRIVAL).expect("no photo-ready notification")
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// =============================================================================
// HAPPY PATH
// =============================================================================

#[test]
fn test_capture_is_saved_under_part_number() {
    let h = Harness::build(MockCameraConfig::default(), |c| c.thumbnail.enabled = true);
    h.station.bind_part("639808GT");
    let rx = h.station.subscribe();
    let content = padded_jpeg(1200, 800, 500_000).unwrap();

    let raw = h.camera.capture("IMG_0001.JPG", content.clone());
    let artifact = next(&rx);

    let expected: PathBuf = h.root().join("639808GT").join("639808GT.103.JPG");
    assert_eq!(artifact.full_image_path, expected);
    assert_eq!(artifact.part_number, "639808GT");
    assert_eq!(artifact.sequence, 103);
    assert_eq!(artifact.bytes, 500_000);
    assert_eq!(fs::read(&expected).unwrap(), content);

    let thumb = artifact.thumbnail_path.clone().unwrap();
    assert_eq!(thumb, h.root().join("639808GT").join("639808GT.103.thumb.JPG"));
    let (w, hgt) = image::image_dimensions(&thumb).unwrap();
    assert!(w <= 300 && hgt <= 300, "thumbnail is {}x{}", w, hgt);

    assert!(h.camera.is_deleted(raw));
    assert!(rx.recv_timeout(QUIET).is_err());
    h.settle();
    h.assert_clean();
}

#[test]
fn test_sequences_continue_within_a_part() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    h.camera.capture("IMG_0001.JPG", vec![1; 2048]);
    assert_eq!(next(&rx).sequence, 103);
    h.camera.capture("IMG_0002.JPG", vec![2; 2048]);
    assert_eq!(next(&rx).sequence, 104);

    assert_eq!(h.part_files("P"), vec!["P.103.JPG", "P.104.JPG"]);
}

#[test]
fn test_concurrent_captures_get_distinct_numbers() {
    let h = Harness::build(
        MockCameraConfig {
            transfer_delay: Duration::from_millis(20),
            ..Default::default()
        },
        |_| {},
    );
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    for i in 0..5u8 {
        h.camera.capture(&format!("IMG_000{}.JPG", i), vec![i + 1; 4096]);
    }
    let mut sequences: Vec<u32> = (0..5).map(|_| next(&rx).sequence).collect();
    sequences.sort();

    assert_eq!(sequences, vec![103, 104, 105, 106, 107]);
    assert_eq!(h.part_files("P").len(), 5);
    h.settle();
    h.assert_clean();
}

#[test]
fn test_existing_files_are_not_overwritten() {
    let h = Harness::new();
    fs::create_dir_all(h.root().join("P")).unwrap();
    fs::write(h.root().join("P").join("P.103.JPG"), b"earlier").unwrap();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    h.camera.capture("IMG_0001.JPG", vec![7; 1024]);

    assert_eq!(next(&rx).sequence, 104);
    assert_eq!(fs::read(h.root().join("P").join("P.103.JPG")).unwrap(), b"earlier");
}

#[test]
fn test_aborted_capture_gives_its_number_back() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let failed = h.camera.add_file("IMG_0001.JPG", vec![5; 4096]);
    h.camera.fail_downloads(failed, 1000, codes::DEVICE_BUSY);
    h.camera.queue_object_event(object_codes::DIR_ITEM_CREATED, failed);
    assert!(wait_until(ARRIVAL, || h.camera.cancelled().contains(&failed)));
    h.settle();
    assert!(h.part_files("P").is_empty());

    h.camera.capture("IMG_0002.JPG", vec![6; 4096]);

    assert_eq!(next(&rx).sequence, 103);
    assert_eq!(h.part_files("P"), vec!["P.103.JPG"]);
}

#[test]
fn test_deleted_capture_number_is_reused() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    h.camera.capture("IMG_0001.JPG", vec![1; 1024]);
    assert_eq!(next(&rx).sequence, 103);
    h.camera.capture("IMG_0002.JPG", vec![2; 1024]);
    assert_eq!(next(&rx).sequence, 104);
    h.settle();
    fs::remove_file(h.root().join("P").join("P.103.JPG")).unwrap();

    h.camera.capture("IMG_0003.JPG", vec![3; 1024]);

    assert_eq!(next(&rx).sequence, 103);
    assert_eq!(h.part_files("P"), vec!["P.103.JPG", "P.104.JPG"]);
}

// =============================================================================
// DEDUPLICATION AND SESSIONS
// =============================================================================

#[test]
fn test_repeated_events_download_once() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let raw = h.camera.capture("IMG_0001.JPG", vec![3; 2048]);
    h.camera.queue_object_event(object_codes::DIR_ITEM_REQUEST_TRANSFER, raw);
    h.camera.fire_object_event(object_codes::DIR_ITEM_REQUEST_TRANSFER_DT, Some(raw));

    next(&rx);
    assert!(rx.recv_timeout(QUIET).is_err());
    h.settle();

    assert_eq!(h.camera.download_calls(raw), 1);
    assert_eq!(h.part_files("P"), vec!["P.103.JPG"]);
    h.assert_clean();
}

#[test]
fn test_new_part_starts_fresh() {
    let h = Harness::new();
    let rx = h.station.subscribe();

    h.station.bind_part("A");
    h.camera.capture("IMG_0001.JPG", vec![1; 1024]);
    let first = next(&rx);

    h.station.bind_part("B");
    h.camera.capture("IMG_0002.JPG", vec![2; 1024]);
    let second = next(&rx);

    assert_eq!(first.part_number, "A");
    assert_eq!(second.part_number, "B");
    assert_eq!(second.sequence, 103);
    assert!(rx.recv_timeout(QUIET).is_err());
    assert_eq!(h.part_files("A"), vec!["A.103.JPG"]);
    assert_eq!(h.part_files("B"), vec!["B.103.JPG"]);
}

#[test]
fn test_rebinding_same_part_does_not_duplicate() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let raw = h.camera.capture("IMG_0001.JPG", vec![1; 1024]);
    assert_eq!(next(&rx).sequence, 103);
    h.settle();

    h.station.bind_part("P");
    h.camera.queue_object_event(object_codes::DIR_ITEM_REQUEST_TRANSFER, raw);

    assert!(rx.recv_timeout(QUIET).is_err());
    h.settle();
    assert_eq!(h.camera.download_calls(raw), 1);
    assert_eq!(h.part_files("P"), vec!["P.103.JPG"]);
    h.assert_clean();
}

#[test]
fn test_capture_without_part_stays_on_camera() {
    let h = Harness::new();
    let rx = h.station.subscribe();

    let raw = h.camera.capture("IMG_0001.JPG", vec![1; 1024]);

    assert!(wait_until(ARRIVAL, || h.camera.release_count(raw) == 1));
    assert!(rx.recv_timeout(QUIET).is_err());
    assert!(!h.camera.is_deleted(raw));
    assert_eq!(h.camera.total_download_calls(), 0);
    h.assert_clean();
}

#[test]
fn test_ignored_event_is_released() {
    let h = Harness::new();
    h.station.bind_part("P");

    let raw = h.camera.add_file("IMG_0001.JPG", vec![1; 1024]);
    h.camera.queue_object_event(object_codes::DIR_ITEM_REMOVED, raw);

    assert!(wait_until(ARRIVAL, || h.camera.release_count(raw) == 1));
    assert_eq!(h.camera.total_download_calls(), 0);
    h.assert_clean();
}

// =============================================================================
// TRANSPORTS AND RETRIES
// =============================================================================

#[test]
fn test_in_memory_failure_falls_back_to_disk() {
    let h = Harness::build(
        MockCameraConfig {
            fail_memory_stream: true,
            ..Default::default()
        },
        |_| {},
    );
    h.station.bind_part("P");
    let rx = h.station.subscribe();
    let content = vec![9; 64 * 1024];

    let raw = h.camera.capture("IMG_0001.JPG", content.clone());
    let artifact = next(&rx);

    assert_eq!(fs::read(&artifact.full_image_path).unwrap(), content);
    assert_eq!(h.camera.file_streams_created(), vec![CreateDisposition::CreateNew]);
    assert_eq!(h.camera.memory_downloads(), 0);
    assert_eq!(h.camera.file_downloads(), 1);
    assert!(h.camera.is_deleted(raw));
    h.settle();
    h.assert_clean();
}

#[test]
fn test_busy_camera_is_retried() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let raw = h.camera.add_file("IMG_0001.JPG", vec![5; 4096]);
    h.camera.fail_downloads(raw, 5, codes::DEVICE_BUSY);
    h.camera.queue_object_event(object_codes::DIR_ITEM_CREATED, raw);

    let artifact = next(&rx);

    assert_eq!(artifact.bytes, 4096);
    assert_eq!(h.camera.download_calls(raw), 6);
    assert_eq!(h.camera.memory_downloads(), 1);
    assert_eq!(h.camera.file_downloads(), 0);
}

#[test]
fn test_always_busy_leaves_photo_on_camera() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let raw = h.camera.add_file("IMG_0001.JPG", vec![5; 4096]);
    h.camera.fail_downloads(raw, 1000, codes::DEVICE_BUSY);
    h.camera.queue_object_event(object_codes::DIR_ITEM_CREATED, raw);

    assert!(wait_until(ARRIVAL, || h.camera.cancelled().contains(&raw)));
    h.settle();

    assert!(rx.try_recv().is_err());
    assert_eq!(h.camera.download_calls(raw), 12);
    assert!(!h.camera.is_deleted(raw));
    assert_eq!(h.camera.release_count(raw), 1);
    assert!(h.part_files("P").is_empty());
    h.assert_clean();
}

#[test]
fn test_delete_happens_after_file_is_complete() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();
    let content = vec![4; 100_000];
    let expected = h.root().join("P").join("P.103.JPG");

    let verified = Arc::new(AtomicBool::new(false));
    let seen = verified.clone();
    let path = expected.clone();
    let len = content.len() as u64;
    h.camera.on_delete(Arc::new(move |_| {
        let complete = fs::metadata(&path).map(|m| m.len() == len).unwrap_or(false);
        seen.store(complete, Ordering::SeqCst);
    }));

    let raw = h.camera.capture("IMG_0001.JPG", content);
    next(&rx);

    assert!(h.camera.is_deleted(raw));
    assert!(verified.load(Ordering::SeqCst));
}

#[test]
fn test_failed_delete_still_reports_photo() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let raw = h.camera.add_file("IMG_0001.JPG", vec![1; 1024]);
    h.camera.fail_delete(raw, codes::INTERNAL_ERROR);
    h.camera.queue_object_event(object_codes::DIR_ITEM_CREATED, raw);

    let artifact = next(&rx);
    h.settle();

    assert!(artifact.full_image_path.exists());
    assert!(!h.camera.is_deleted(raw));
    assert_eq!(h.camera.release_count(raw), 1);
    h.assert_clean();
}

#[test]
fn test_folder_event_downloads_contained_image() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    let folder = h.camera.add_folder("100CANON");
    h.camera.add_child_file(folder, "IMG_0001.XMP", vec![0; 16]);
    let image = h.camera.add_child_file(folder, "IMG_0001.JPG", vec![8; 2048]);
    h.camera.queue_object_event(object_codes::DIR_ITEM_REQUEST_TRANSFER, folder);

    let artifact = next(&rx);
    h.settle();

    assert_eq!(artifact.bytes, 2048);
    assert!(h.camera.is_deleted(image));
    assert_eq!(h.camera.release_count(folder), 1);
    h.assert_clean();
}

// =============================================================================
// CONNECTION
// =============================================================================

#[test]
fn test_reconnect_after_camera_shutdown() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    h.camera.fire_state_event(state_codes::SHUTDOWN, 0);
    assert!(!h.station.is_connected());

    assert!(h.station.connect(false).unwrap());
    assert!(h.station.is_connected());

    h.camera.capture("IMG_0001.JPG", vec![1; 1024]);
    assert_eq!(next(&rx).sequence, 103);
}

#[test]
fn test_disconnect_stops_delivery() {
    let h = Harness::new();
    h.station.bind_part("P");
    let rx = h.station.subscribe();

    h.station.disconnect();
    h.camera.capture("IMG_0001.JPG", vec![1; 1024]);

    assert!(rx.recv_timeout(QUIET).is_err());
    assert!(!h.camera.is_session_open());
    assert_eq!(h.camera.terminate_count(), 1);
}
