//! Capture station facade
//!
//! Wires the connection manager, event classifier, download dispatcher and
//! notifier together behind one object that a UI or the CLI drives.

use crate::capture::classifier::{DownloadDispatcher, EventClassifier};
use crate::capture::download::{DownloadOrchestrator, TransferSettings};
use crate::capture::notifier::{CapturedArtifact, PhotoNotifier};
use crate::capture::resolver::TransferResolver;
use crate::capture::thumbnail::ThumbnailGenerator;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::sequence::{DirectorySequenceStore, SequenceAllocator};
use crate::core::session::{CaptureState, SequenceFn, SessionContext};
use crate::device::connection::{ConnectionSettings, SessionManager};
use crate::device::traits::{CameraDriver, RawEvent};
use crossbeam_channel::Receiver;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub struct CaptureStation {
    state: Arc<CaptureState>,
    notifier: Arc<PhotoNotifier>,
    orchestrator: Arc<DownloadOrchestrator>,
    dispatcher: Arc<DownloadDispatcher>,
    classifier: Arc<EventClassifier>,
    sessions: SessionManager,
    sequences: Arc<SequenceAllocator>,
    output_root: PathBuf,
}

impl CaptureStation {
    /// Build a station around `driver`. Downloads run on `runtime`.
    pub fn new(driver: Arc<dyn CameraDriver>, config: &Config, runtime: Handle) -> Self {
        let state = Arc::new(CaptureState::new());
        let notifier = Arc::new(PhotoNotifier::new());
        let transfer = &config.transfer;

        let thumbnails = config
            .thumbnail
            .enabled
            .then(|| ThumbnailGenerator::new(&config.thumbnail));
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            driver.clone(),
            state.clone(),
            notifier.clone(),
            thumbnails,
            TransferSettings::from(transfer),
        ));
        let resolver = Arc::new(TransferResolver::new(
            driver.clone(),
            transfer.retry_policy(),
            &transfer.accepted_extensions,
        ));
        let dispatcher = Arc::new(DownloadDispatcher::new(
            runtime,
            transfer.max_concurrent_downloads,
            resolver,
            orchestrator.clone(),
        ));
        let classifier = Arc::new(EventClassifier::new(
            driver.clone(),
            config.events.clone(),
            state.clone(),
            dispatcher.clone(),
        ));

        let handler_target = classifier.clone();
        let sessions = SessionManager::new(
            driver,
            ConnectionSettings::from(&config.connection),
            Arc::new(move |event| handler_target.on_raw_event(event)),
            state.clone(),
        );

        let output_root = config.output.root.clone();
        let sequences = Arc::new(SequenceAllocator::new(Arc::new(
            DirectorySequenceStore::new(output_root.clone()),
        )));

        Self {
            state,
            notifier,
            orchestrator,
            dispatcher,
            classifier,
            sessions,
            sequences,
            output_root,
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// See [`SessionManager::connect`]
    pub fn connect(&self, force: bool) -> Result<bool> {
        self.sessions.connect(force)
    }

    pub fn disconnect(&self) {
        self.sessions.disconnect();
        self.orchestrator.reset_primary_failures();
    }

    pub fn is_connected(&self) -> bool {
        self.sessions.is_connected()
    }

    pub fn connected_model_name(&self) -> Option<String> {
        self.sessions.connected_model_name()
    }

    pub fn last_connect_error(&self) -> Option<String> {
        self.sessions.last_error()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Bind the part number new captures are filed under. Clears the
    /// processed-capture memory.
    pub fn set_session_context(
        &self,
        part_number: &str,
        next_sequence: SequenceFn,
        output_root: impl Into<PathBuf>,
    ) {
        self.bind(SessionContext::new(part_number, next_sequence, output_root));
    }

    /// Bind `part_number` under the configured output root, numbering files
    /// from what is already in the part folder. Numbers of aborted downloads
    /// are handed out again.
    pub fn bind_part(&self, part_number: &str) {
        let (next, settle) = self.sequences.session_fns(part_number);
        self.bind(
            SessionContext::new(part_number, next, self.output_root.clone()).with_settle(settle),
        );
    }

    fn bind(&self, context: SessionContext) {
        info!(
            "Capturing part {} into {}",
            context.part_number(),
            context.part_dir().display()
        );
        self.state.set_session(context);
        self.orchestrator.reset_primary_failures();
    }

    /// New captures are released on the camera until a part is bound again
    pub fn clear_session_context(&self) {
        self.state.clear_session();
        info!("Part number cleared");
    }

    pub fn session(&self) -> Option<Arc<SessionContext>> {
        self.state.session()
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    // ========================================================================
    // Captures
    // ========================================================================

    /// Receive a [`CapturedArtifact`] for every committed capture
    pub fn subscribe(&self) -> Receiver<CapturedArtifact> {
        self.notifier.subscribe()
    }

    /// Feed an object event in directly, as the driver callback would
    pub fn on_raw_event(&self, event: RawEvent) {
        self.classifier.on_raw_event(event);
    }

    /// Downloads in progress
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Wait for in-progress downloads; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }
}

impl Drop for CaptureStation {
    fn drop(&mut self) {
        self.sessions.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::events::object_codes;
    use crate::testdb::MockCamera;
    use tempfile::TempDir;

    fn station(mock: &Arc<MockCamera>, root: &Path, runtime: &tokio::runtime::Runtime) -> CaptureStation {
        let mut config = Config::default();
        config.output.root = root.to_path_buf();
        config.connection.pump_interval_ms = 5;
        config.thumbnail.enabled = false;
        CaptureStation::new(mock.clone(), &config, runtime.handle().clone())
    }

    #[test]
    fn test_bind_part_numbers_from_existing_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("P")).unwrap();
        std::fs::write(temp.path().join("P").join("P.103.JPG"), b"x").unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCamera::new());
        let station = station(&mock, temp.path(), &runtime);

        station.bind_part("P");

        let session = station.session().unwrap();
        assert_eq!(session.part_number(), "P");
        assert_eq!(session.output_root(), temp.path());
        assert_eq!(session.next_sequence(), 104);
        session.settle_sequence(104, false);
        assert_eq!(session.next_sequence(), 104);
    }

    #[test]
    fn test_capture_without_part_is_released() {
        let temp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCamera::new());
        let station = station(&mock, temp.path(), &runtime);
        let raw = mock.add_file("IMG_0001.JPG", vec![1; 64]);

        station.on_raw_event(RawEvent {
            code: object_codes::DIR_ITEM_CREATED,
            native_ref: Some(raw),
            context: 0,
        });

        assert_eq!(station.in_flight(), 0);
        assert_eq!(mock.release_count(raw), 1);
        assert!(!mock.is_deleted(raw));
    }

    #[test]
    fn test_clear_session_context() {
        let temp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCamera::new());
        let station = station(&mock, temp.path(), &runtime);

        station.bind_part("P");
        station.clear_session_context();

        assert!(station.session().is_none());
        let raw = mock.add_file("IMG_0002.JPG", vec![1; 64]);
        station.on_raw_event(RawEvent {
            code: object_codes::DIR_ITEM_CREATED,
            native_ref: Some(raw),
            context: 0,
        });
        assert_eq!(mock.release_count(raw), 1);
    }

    #[test]
    fn test_connect_reports_model() {
        let temp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCamera::new());
        let station = station(&mock, temp.path(), &runtime);

        assert!(station.connect(false).unwrap());
        assert!(station.is_connected());
        assert_eq!(station.connected_model_name().as_deref(), Some("Canon EOS R6 Mark II"));

        station.disconnect();
        assert!(!station.is_connected());
        assert!(station.last_connect_error().is_none());
    }
}
