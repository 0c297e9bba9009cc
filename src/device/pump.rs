//! Event pump
//!
//! The driver only delivers callbacks while someone asks it to dispatch
//! pending events. The pump does that on a dedicated thread at a fixed
//! period, and keeps a noisy driver from flooding the log.

use super::traits::{CameraDriver, DriverError};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// =============================================================================
// Burst suppression
// =============================================================================

/// Counts consecutive dispatch failures and rate-limits their log lines
#[derive(Debug, Clone)]
pub struct BurstLog {
    interval: Duration,
    failures: u32,
    last_logged: Option<Instant>,
}

impl BurstLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            failures: 0,
            last_logged: None,
        }
    }

    /// Consecutive failures so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure; true when this one should be logged
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.failures += 1;
        let due = match self.last_logged {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        };
        if due {
            self.last_logged = Some(now);
        }
        due
    }

    /// Record a success; returns the length of the burst it ended, if any
    pub fn record_success(&mut self) -> Option<u32> {
        let ended = (self.failures > 0).then_some(self.failures);
        self.failures = 0;
        self.last_logged = None;
        ended
    }
}

// =============================================================================
// Pump
// =============================================================================

/// Periodically asks the driver to dispatch pending events
pub struct EventPump {
    driver: Arc<dyn CameraDriver>,
    interval: Duration,
    burst_log_interval: Duration,
    shutdown_flag: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl EventPump {
    pub fn new(driver: Arc<dyn CameraDriver>, interval: Duration, burst_log_interval: Duration) -> Self {
        Self {
            driver,
            interval: interval.max(Duration::from_millis(1)),
            burst_log_interval,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    /// Start pumping. Does nothing if already running.
    pub fn start(&self) -> std::io::Result<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_flag.store(false, Ordering::SeqCst);

        let driver = Arc::clone(&self.driver);
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let interval = self.interval;
        let burst = BurstLog::new(self.burst_log_interval);

        let spawned = thread::Builder::new()
            .name("event-pump".to_string())
            .spawn(move || Self::pump_loop(driver, interval, burst, shutdown_flag));

        match spawned {
            Ok(handle) => {
                *self
                    .thread_handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!("Event pump started ({:?} period)", interval);
                Ok(())
            }
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop pumping and wait for the thread. Idempotent.
    pub fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_flag.store(true, Ordering::SeqCst);

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A handler running on the pump thread cannot wait for itself
            if handle.thread().id() == thread::current().id() {
                debug!("Event pump stop requested from its own thread");
            } else {
                let _ = handle.join();
            }
        }
        info!("Event pump stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn pump_loop(
        driver: Arc<dyn CameraDriver>,
        interval: Duration,
        mut burst: BurstLog,
        shutdown_flag: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown_flag.load(Ordering::SeqCst) {
                debug!("Event pump shutdown requested");
                break;
            }

            match driver.dispatch_events() {
                Ok(()) => {
                    if let Some(failures) = burst.record_success() {
                        debug!("Event dispatch recovered after {} failure(s)", failures);
                    }
                }
                Err(e) => Self::report(&mut burst, e),
            }

            thread::sleep(interval);
        }
    }

    fn report(burst: &mut BurstLog, e: DriverError) {
        if burst.record_failure(Instant::now()) {
            warn!(
                "Event dispatch failing: {} ({} consecutive)",
                e,
                burst.failures()
            );
        } else {
            trace!("Event dispatch failed: {}", e);
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::events::object_codes;
    use crate::device::traits::{codes, ObjectEventHandler, RawRef};
    use crate::testdb::MockCamera;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_burst_log_rate_limits() {
        let mut burst = BurstLog::new(Duration::from_secs(2));
        let start = Instant::now();

        assert!(burst.record_failure(start));
        assert!(!burst.record_failure(start + Duration::from_millis(100)));
        assert!(!burst.record_failure(start + Duration::from_millis(1900)));
        assert!(burst.record_failure(start + Duration::from_millis(2100)));
        assert_eq!(burst.failures(), 4);

        assert_eq!(burst.record_success(), Some(4));
        assert_eq!(burst.failures(), 0);
        assert_eq!(burst.record_success(), None);

        // A new burst logs its first failure immediately
        assert!(burst.record_failure(start + Duration::from_millis(2200)));
    }

    #[test]
    fn test_pump_dispatches_until_stopped() {
        let mock = Arc::new(MockCamera::new());
        let pump = EventPump::new(mock.clone(), Duration::from_millis(5), Duration::from_secs(2));

        pump.start().unwrap();
        assert!(pump.is_running());
        thread::sleep(Duration::from_millis(60));
        pump.stop();
        assert!(!pump.is_running());

        let dispatched = mock.dispatch_count();
        assert!(dispatched >= 2, "only {} dispatches", dispatched);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(mock.dispatch_count(), dispatched);

        // Stopping twice is harmless
        pump.stop();
    }

    #[test]
    fn test_pump_delivers_queued_events() {
        let mock = Arc::new(MockCamera::new());
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        let handler: ObjectEventHandler = Arc::new(move |event| {
            assert_eq!(event.code, object_codes::DIR_ITEM_CREATED);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        mock.set_object_event_handler(RawRef(0), Some(handler)).unwrap();
        mock.queue_object_event(object_codes::DIR_ITEM_CREATED, RawRef(1));

        let pump = EventPump::new(mock.clone(), Duration::from_millis(5), Duration::from_secs(2));
        pump.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        pump.stop();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pump_survives_dispatch_errors() {
        let mock = Arc::new(MockCamera::new());
        mock.configure(|c| c.dispatch_error = Some(codes::DEVICE_BUSY));
        let pump = EventPump::new(mock.clone(), Duration::from_millis(5), Duration::from_secs(2));

        pump.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        assert!(pump.is_running());
        pump.stop();

        assert!(mock.dispatch_count() >= 2);
    }

    #[test]
    fn test_restart_after_stop() {
        let mock = Arc::new(MockCamera::new());
        let pump = EventPump::new(mock.clone(), Duration::from_millis(5), Duration::from_secs(2));

        pump.start().unwrap();
        pump.stop();
        let before = mock.dispatch_count();
        pump.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        pump.stop();

        assert!(mock.dispatch_count() > before);
    }
}
