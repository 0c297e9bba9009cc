//! Download orchestration
//!
//! Moves one resolved file from the camera to `{root}/{part}/{part}.{seq}{ext}`:
//!
//! ```text
//! Naming -> Primary (in-memory) -> [Fallback (disk-backed)] -> Verify -> Commit | Abort
//! ```
//!
//! The camera's copy is deleted only after the file is verified on disk.
//! Failures never leave this module: an aborted download is logged with the
//! stage and driver code, its path reservation is released, and the item
//! stays on the camera.

use crate::capture::notifier::{CapturedArtifact, PhotoNotifier};
use crate::capture::resolver::ResolvedItem;
use crate::capture::thumbnail::ThumbnailGenerator;
use crate::core::config::TransferConfig;
use crate::core::retry::{RetryExhausted, RetryPolicy};
use crate::core::session::{CaptureState, SessionContext};
use crate::device::handle::DeviceHandle;
use crate::device::traits::{CameraDriver, CreateDisposition, DriverError};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Naming attempts before the download is abandoned
const MAX_NAMING_ATTEMPTS: usize = 64;

// ============================================================================
// Failure reporting
// ============================================================================

/// Where a download failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Naming,
    PrimaryStream,
    PrimaryTransfer,
    PrimaryExtract,
    PrimaryWrite,
    PrimaryVerify,
    FallbackStream,
    FallbackTransfer,
    FallbackVerify,
}

impl Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStage::Naming => "naming",
            TransferStage::PrimaryStream => "in-memory stream creation",
            TransferStage::PrimaryTransfer => "in-memory transfer",
            TransferStage::PrimaryExtract => "in-memory extraction",
            TransferStage::PrimaryWrite => "file write",
            TransferStage::PrimaryVerify => "file verification",
            TransferStage::FallbackStream => "disk stream creation",
            TransferStage::FallbackTransfer => "disk-backed transfer",
            TransferStage::FallbackVerify => "disk-backed verification",
        };
        f.write_str(name)
    }
}

/// Why one transport gave up
#[derive(Debug, Clone)]
pub(crate) struct TransferFailure {
    pub stage: TransferStage,
    pub code: Option<u32>,
    pub message: String,
}

impl TransferFailure {
    fn new(stage: TransferStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: None,
            message: message.into(),
        }
    }

    fn driver(stage: TransferStage, err: DriverError) -> Self {
        Self {
            stage,
            code: Some(err.code()),
            message: err.to_string(),
        }
    }

    fn exhausted(stage: TransferStage, err: RetryExhausted) -> Self {
        Self {
            stage,
            code: Some(err.last_error.code()),
            message: format!("{} after {} attempt(s)", err.last_error, err.attempts),
        }
    }
}

impl Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} failed (code 0x{:08X}): {}", self.stage, code, self.message),
            None => write!(f, "{} failed: {}", self.stage, self.message),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Transport tuning, taken from `[transfer]`
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub retry: RetryPolicy,
    pub default_buffer_bytes: u64,
    pub fallback_wait: Duration,
    pub fallback_poll: Duration,
    pub prefer_fallback_after_failures: u32,
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            default_buffer_bytes: config.default_buffer_bytes.max(1),
            fallback_wait: config.fallback_wait(),
            fallback_poll: config.fallback_poll(),
            prefer_fallback_after_failures: config.prefer_fallback_after_failures,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs the per-file download state machine
pub struct DownloadOrchestrator {
    driver: Arc<dyn CameraDriver>,
    state: Arc<CaptureState>,
    notifier: Arc<PhotoNotifier>,
    thumbnails: Option<ThumbnailGenerator>,
    settings: TransferSettings,
    primary_failures: AtomicU32,
}

impl DownloadOrchestrator {
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        state: Arc<CaptureState>,
        notifier: Arc<PhotoNotifier>,
        thumbnails: Option<ThumbnailGenerator>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            driver,
            state,
            notifier,
            thumbnails,
            settings,
            primary_failures: AtomicU32::new(0),
        }
    }

    /// Consecutive in-memory transport failures
    pub fn primary_failures(&self) -> u32 {
        self.primary_failures.load(Ordering::SeqCst)
    }

    /// Give the in-memory transport another chance
    pub fn reset_primary_failures(&self) {
        self.primary_failures.store(0, Ordering::SeqCst);
    }

    fn prefers_fallback(&self) -> bool {
        let threshold = self.settings.prefer_fallback_after_failures;
        threshold > 0 && self.primary_failures() >= threshold
    }

    /// Download `item` into the session's part folder.
    ///
    /// Returns the artifact on commit. On abort the camera keeps its copy and
    /// `None` is returned. The item handle is released exactly once either
    /// way, unless the driver retired it by deleting the item.
    pub fn download(&self, item: ResolvedItem, session: &SessionContext) -> Option<CapturedArtifact> {
        let ResolvedItem { handle, info } = item;
        let ext = Path::new(&info.file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let (path, sequence) = match self.allocate_path(session, &ext) {
            Ok(named) => named,
            Err(failure) => {
                error!("Capture {} dropped: {}", info.file_name, failure);
                return None;
            }
        };

        if !self.state.reserve_path(&path) {
            session.settle_sequence(sequence, false);
            warn!(
                "{} is already being written by another download, dropping {}",
                path.display(),
                info.file_name
            );
            return None;
        }

        debug!(
            "Downloading {} ({} bytes) to {}",
            info.file_name,
            info.size,
            path.display()
        );

        let transferred = if self.prefers_fallback() {
            debug!(
                "{} consecutive in-memory failures, using disk-backed transport",
                self.primary_failures()
            );
            self.fallback(&handle, info.size, &path)
        } else {
            match self.primary(&handle, info.size, &path) {
                Ok(bytes) => {
                    self.reset_primary_failures();
                    Ok(bytes)
                }
                Err(failure) => {
                    self.primary_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        "In-memory transport for {}: {}; trying disk-backed transport",
                        info.file_name, failure
                    );
                    self.fallback(&handle, info.size, &path)
                }
            }
        };

        let bytes = match transferred {
            Ok(bytes) => bytes,
            Err(failure) => {
                self.abort(handle, &path, &info.file_name, &failure);
                session.settle_sequence(sequence, false);
                return None;
            }
        };
        session.settle_sequence(sequence, true);

        // The file is verified; only now may the camera drop its copy
        let raw = handle.raw();
        match handle.delete_source() {
            Ok(()) => self.state.retire_ref(raw),
            Err((handle, e)) => {
                warn!(
                    "{} saved but could not be deleted from the camera: {}",
                    info.file_name, e
                );
                drop(handle);
            }
        }

        let thumbnail_path = self.thumbnails.as_ref().and_then(|t| t.generate(&path));

        let artifact = CapturedArtifact {
            full_image_path: path,
            thumbnail_path,
            part_number: session.part_number().to_string(),
            sequence,
            bytes,
            captured_at: Utc::now(),
        };
        info!(
            "Saved {} -> {} ({} bytes)",
            info.file_name,
            artifact.full_image_path.display(),
            bytes
        );
        self.notifier.notify(&artifact);
        Some(artifact)
    }

    /// Pick a free `{part}.{seq}{ext}` path, re-asking for a number while the
    /// candidate already exists on disk
    fn allocate_path(&self, session: &SessionContext, ext: &str) -> Result<(PathBuf, u32), TransferFailure> {
        let dir = session.part_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            TransferFailure::new(
                TransferStage::Naming,
                format!("cannot create {}: {}", dir.display(), e),
            )
        })?;

        let mut tried: BTreeSet<u32> = BTreeSet::new();
        for _ in 0..MAX_NAMING_ATTEMPTS {
            let mut sequence = session.next_sequence();
            if tried.contains(&sequence) {
                sequence = tried.last().map(|max| max.saturating_add(1)).unwrap_or(sequence);
            }
            tried.insert(sequence);

            let path = session.output_path(sequence, ext);
            if path.exists() {
                debug!("{} already exists, asking for another number", path.display());
                session.settle_sequence(sequence, true);
                continue;
            }
            return Ok((path, sequence));
        }

        Err(TransferFailure::new(
            TransferStage::Naming,
            format!("no free name for part {} after {} attempts", session.part_number(), MAX_NAMING_ATTEMPTS),
        ))
    }

    /// In-memory transport: download into a driver buffer, copy it out, write
    /// and verify the file
    fn primary(&self, item: &DeviceHandle, size: u64, path: &Path) -> Result<u64, TransferFailure> {
        let capacity = if size > 0 {
            size
        } else {
            self.settings.default_buffer_bytes
        };

        let stream = self
            .driver
            .create_memory_stream(capacity)
            .map(|raw| DeviceHandle::adopt(self.driver.clone(), raw))
            .map_err(|e| TransferFailure::driver(TransferStage::PrimaryStream, e))?;

        self.settings
            .retry
            .run("in-memory transfer", |_| {
                self.driver.download(item.raw(), capacity, stream.raw())
            })
            .map_err(|e| TransferFailure::exhausted(TransferStage::PrimaryTransfer, e))?;

        if let Err(e) = self.driver.download_complete(item.raw()) {
            warn!("Transfer-complete acknowledgement for {} failed: {}", item.raw(), e);
        }

        let bytes = self.extract(&stream)?;
        stream.release();

        if bytes.is_empty() {
            return Err(TransferFailure::new(
                TransferStage::PrimaryExtract,
                "stream holds no data",
            ));
        }

        fs::write(path, &bytes).map_err(|e| {
            TransferFailure::new(TransferStage::PrimaryWrite, format!("{}: {}", path.display(), e))
        })?;

        let on_disk = fs::metadata(path).map(|m| m.len()).map_err(|e| {
            TransferFailure::new(TransferStage::PrimaryVerify, format!("{}: {}", path.display(), e))
        })?;
        if on_disk != bytes.len() as u64 {
            return Err(TransferFailure::new(
                TransferStage::PrimaryVerify,
                format!("{} bytes on disk, {} extracted", on_disk, bytes.len()),
            ));
        }
        if size > 0 && on_disk != size {
            return Err(TransferFailure::new(
                TransferStage::PrimaryVerify,
                format!("{} bytes on disk, camera reported {}", on_disk, size),
            ));
        }
        Ok(on_disk)
    }

    /// Copy bytes out of a memory stream: direct pointer first, read-based
    /// when the driver does not support pointer access
    fn extract(&self, stream: &DeviceHandle) -> Result<Vec<u8>, TransferFailure> {
        match self.driver.stream_pointer_copy(stream.raw()) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_supported() => {
                debug!("Pointer access unsupported for {}, reading stream instead", stream.raw());
                self.driver
                    .stream_rewind(stream.raw())
                    .map_err(|e| TransferFailure::driver(TransferStage::PrimaryExtract, e))?;
                let len = self
                    .driver
                    .stream_length(stream.raw())
                    .map_err(|e| TransferFailure::driver(TransferStage::PrimaryExtract, e))?;
                self.driver
                    .stream_read(stream.raw(), len)
                    .map_err(|e| TransferFailure::driver(TransferStage::PrimaryExtract, e))
            }
            Err(e) => Err(TransferFailure::driver(TransferStage::PrimaryExtract, e)),
        }
    }

    /// Disk-backed transport: the driver writes straight into the destination
    fn fallback(&self, item: &DeviceHandle, size: u64, path: &Path) -> Result<u64, TransferFailure> {
        remove_partial(path);

        let stream = self.open_file_stream(path)?;
        let transfer_size = if size > 0 {
            size
        } else {
            self.settings.default_buffer_bytes
        };

        self.settings
            .retry
            .run("disk-backed transfer", |_| {
                self.driver.download(item.raw(), transfer_size, stream.raw())
            })
            .map_err(|e| TransferFailure::exhausted(TransferStage::FallbackTransfer, e))?;

        if let Err(e) = self.driver.download_complete(item.raw()) {
            warn!("Transfer-complete acknowledgement for {} failed: {}", item.raw(), e);
        }

        // The driver flushes the file when the stream is released
        stream.release();

        self.wait_for_file(path, size)
    }

    fn open_file_stream(&self, path: &Path) -> Result<DeviceHandle, TransferFailure> {
        let mut last_error = None;
        for disposition in [CreateDisposition::CreateNew, CreateDisposition::CreateAlways] {
            match self.driver.create_file_stream(path, disposition) {
                Ok(raw) => return Ok(DeviceHandle::adopt(self.driver.clone(), raw)),
                Err(e) => {
                    debug!("File stream {:?} for {} failed: {}", disposition, path.display(), e);
                    last_error = Some(e);
                }
            }
        }

        // Tell a permission problem apart from a driver problem
        let diagnosis = match fs::write(path, b"") {
            Ok(()) => {
                remove_partial(path);
                "the path is writable, the driver refused the stream".to_string()
            }
            Err(e) => format!("the path is not writable: {}", e),
        };

        Err(TransferFailure {
            stage: TransferStage::FallbackStream,
            code: last_error.map(|e| e.code()),
            message: diagnosis,
        })
    }

    /// Poll until the file has content (and the reported size, when known)
    fn wait_for_file(&self, path: &Path, size: u64) -> Result<u64, TransferFailure> {
        let deadline = Instant::now() + self.settings.fallback_wait;
        let mut last_len = None;
        loop {
            if let Ok(meta) = fs::metadata(path) {
                let len = meta.len();
                if len > 0 && (size == 0 || len == size) {
                    return Ok(len);
                }
                last_len = Some(len);
            }
            if Instant::now() >= deadline {
                let seen = match last_len {
                    Some(len) => format!("{} bytes on disk", len),
                    None => "file never appeared".to_string(),
                };
                return Err(TransferFailure::new(
                    TransferStage::FallbackVerify,
                    format!("{} after {:?} (expected {})", seen, self.settings.fallback_wait, size),
                ));
            }
            thread::sleep(self.settings.fallback_poll);
        }
    }

    /// Leave the camera's copy alone and undo everything on the host side
    fn abort(&self, handle: DeviceHandle, path: &Path, file_name: &str, failure: &TransferFailure) {
        self.state.release_path(path);
        if let Err(e) = self.driver.download_cancel(handle.raw()) {
            debug!("Cancel for {} failed: {}", handle.raw(), e);
        }
        remove_partial(path);
        error!(
            "Capture {} not saved, it stays on the camera. {}",
            file_name, failure
        );
        handle.release();
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}
