//! Event classification, deduplication and download dispatch
//!
//! [`EventClassifier::on_raw_event`] is registered as the driver's object
//! event handler. It may run on a thread the driver owns, so it only takes
//! the capture-state lock briefly and never waits on a download.

use crate::capture::download::DownloadOrchestrator;
use crate::capture::resolver::TransferResolver;
use crate::core::session::{CaptureState, Claim, SessionContext};
use crate::device::events::{EventPolicy, SemanticEvent};
use crate::device::handle::DeviceHandle;
use crate::device::traits::{CameraDriver, RawEvent};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Receives accepted transfer events. Must return without blocking.
pub trait DownloadSink: Send + Sync {
    fn submit(&self, item: DeviceHandle, session: Arc<SessionContext>);
}

// ============================================================================
// Classifier
// ============================================================================

/// Turns raw driver events into at most one download per reference
pub struct EventClassifier {
    driver: Arc<dyn CameraDriver>,
    policy: EventPolicy,
    state: Arc<CaptureState>,
    sink: Arc<dyn DownloadSink>,
}

impl EventClassifier {
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        policy: EventPolicy,
        state: Arc<CaptureState>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        Self {
            driver,
            policy,
            state,
            sink,
        }
    }

    /// Handle one object event from the driver
    pub fn on_raw_event(&self, event: RawEvent) {
        let kind = SemanticEvent::from_code(event.code);
        let Some(raw) = event.native_ref else {
            debug!("{} without an object reference", kind);
            return;
        };
        let handle = DeviceHandle::adopt(self.driver.clone(), raw);

        if self.state.is_ref_retired(raw) {
            debug!("{} for {}, already deleted from the camera", kind, raw);
            handle.relinquish();
            return;
        }

        if !self.policy.is_transfer_eligible(event.code, kind) {
            debug!("Ignoring {} for {}", kind, raw);
            handle.release();
            return;
        }

        match self.state.claim_ref(raw) {
            Claim::NoSession => {
                warn!("{} for {} but no part number is bound, capture dropped", kind, raw);
                handle.release();
            }
            Claim::Duplicate => {
                debug!("Duplicate {} for {}, already processing", kind, raw);
                // The first delivery owns the reference
                handle.relinquish();
            }
            Claim::Retired => {
                debug!("{} for {}, already deleted from the camera", kind, raw);
                handle.relinquish();
            }
            Claim::Accepted(session) => {
                info!("{} for {} (part {})", kind, raw, session.part_number());
                self.sink.submit(handle, session);
            }
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs resolve + download for each accepted event on a tokio runtime,
/// bounded by a semaphore
pub struct DownloadDispatcher {
    runtime: Handle,
    permits: Arc<Semaphore>,
    resolver: Arc<TransferResolver>,
    orchestrator: Arc<DownloadOrchestrator>,
    in_flight: Arc<AtomicUsize>,
}

impl DownloadDispatcher {
    pub fn new(
        runtime: Handle,
        max_concurrent: usize,
        resolver: Arc<TransferResolver>,
        orchestrator: Arc<DownloadOrchestrator>,
    ) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            resolver,
            orchestrator,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Downloads submitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Block until every submitted download has finished, or `timeout` passes.
    /// Returns true if idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl DownloadSink for DownloadDispatcher {
    fn submit(&self, item: DeviceHandle, session: Arc<SessionContext>) {
        let guard = InFlight::enter(&self.in_flight);
        let permits = self.permits.clone();
        let resolver = self.resolver.clone();
        let orchestrator = self.orchestrator.clone();

        self.runtime.spawn(async move {
            let _guard = guard;
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Download queue closed, {} not downloaded", item.raw());
                    return;
                }
            };

            let raw = item.raw();
            let outcome = tokio::task::spawn_blocking(move || {
                resolver
                    .resolve(item)
                    .and_then(|resolved| orchestrator.download(resolved, &session))
            })
            .await;

            if let Err(e) = outcome {
                error!("Download task for {} failed: {}", raw, e);
            }
        });
    }
}
