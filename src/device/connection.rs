//! Camera connection lifecycle
//!
//! [`SessionManager::connect`] walks the driver through the whole handshake.
//! Each acquired resource is wrapped in a guard as soon as it exists, so a
//! failure at any step unwinds everything acquired before it and leaves the
//! manager disconnected.

use super::events::state_codes;
use super::handle::DeviceHandle;
use super::pump::EventPump;
use super::traits::{
    commands, props, Capacity, CameraDriver, ObjectEventHandler, RawRef, StateEventHandler,
};
use crate::core::config::ConnectionConfig;
use crate::core::error::{CaptureError, Result};
use crate::core::session::CaptureState;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Shown when the camera does not report a product name
pub const UNKNOWN_MODEL: &str = "Unknown camera";

/// Connection tuning, taken from `[connection]`
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub cooldown: Duration,
    pub pump_interval: Duration,
    pub burst_log_interval: Duration,
    pub capacity: Capacity,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            cooldown: config.cooldown(),
            pump_interval: config.pump_interval(),
            burst_log_interval: config.burst_log_interval(),
            capacity: Capacity::default(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Terminates the driver subsystem
struct SdkGuard {
    driver: Arc<dyn CameraDriver>,
}

impl Drop for SdkGuard {
    fn drop(&mut self) {
        if let Err(e) = self.driver.terminate() {
            warn!("Driver terminate failed: {}", e);
        }
    }
}

/// Closes the camera session
struct SessionGuard {
    driver: Arc<dyn CameraDriver>,
    camera: RawRef,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.driver.close_session(self.camera) {
            warn!("Closing camera session failed: {}", e);
        }
    }
}

/// Unregisters event handlers, which also breaks the handler -> driver cycle
struct HandlerGuard {
    driver: Arc<dyn CameraDriver>,
    camera: RawRef,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        let _ = self.driver.set_object_event_handler(self.camera, None);
        let _ = self.driver.set_state_event_handler(self.camera, None);
    }
}

/// A live connection. Fields drop top to bottom, which is the teardown order.
struct Connection {
    pump: EventPump,
    _handlers: HandlerGuard,
    _session: SessionGuard,
    _camera: DeviceHandle,
    _list: DeviceHandle,
    _sdk: SdkGuard,
    model_name: String,
}

#[derive(Default)]
struct ManagerState {
    connection: Option<Connection>,
    last_attempt: Option<Instant>,
    last_error: Option<String>,
}

// ============================================================================
// Manager
// ============================================================================

/// Owns the driver handles for the camera list, camera and session
pub struct SessionManager {
    driver: Arc<dyn CameraDriver>,
    settings: ConnectionSettings,
    object_handler: ObjectEventHandler,
    state: Arc<CaptureState>,
    lost: Arc<AtomicBool>,
    inner: Mutex<ManagerState>,
}

impl SessionManager {
    /// `object_handler` is registered with the camera on every connect
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        settings: ConnectionSettings,
        object_handler: ObjectEventHandler,
        state: Arc<CaptureState>,
    ) -> Self {
        Self {
            driver,
            settings,
            object_handler,
            state,
            lost: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(ManagerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to the first attached camera.
    ///
    /// Within the cooldown of the previous attempt this returns the current
    /// state without touching the driver, unless `force` is set or the camera
    /// reported a shutdown. A connected camera is kept as-is unless `force`
    /// is set.
    pub fn connect(&self, force: bool) -> Result<bool> {
        let mut inner = self.lock();
        let lost = self.lost.swap(false, Ordering::SeqCst);

        if inner.connection.is_some() && !force && !lost {
            return Ok(true);
        }

        if !force && !lost {
            if let Some(at) = inner.last_attempt {
                if at.elapsed() < self.settings.cooldown {
                    debug!(
                        "Connect throttled, last attempt {:?} ago",
                        at.elapsed()
                    );
                    return Ok(inner.connection.is_some());
                }
            }
        }

        let stale = inner.connection.take();
        if stale.is_some() {
            info!("Reconnecting camera");
        }
        inner.last_attempt = Some(Instant::now());
        drop(inner);

        // Tear the old connection down without holding the lock; its pump
        // thread may be inside a handler
        drop(stale);
        self.state.reset_dedup();

        let result = self.open_connection();
        let mut inner = self.lock();
        match result {
            Ok(connection) => {
                info!("Connected to {}", connection.model_name);
                inner.connection = Some(connection);
                inner.last_error = None;
                Ok(true)
            }
            Err(e) => {
                warn!("Camera connection failed: {}", e);
                inner.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn open_connection(&self) -> Result<Connection> {
        let driver = &self.driver;

        driver
            .initialize()
            .map_err(|e| CaptureError::from_driver("initialize driver", e))?;
        let sdk = SdkGuard {
            driver: driver.clone(),
        };

        let list = driver
            .camera_list()
            .map(|raw| DeviceHandle::adopt(driver.clone(), raw))
            .map_err(|e| CaptureError::from_driver("enumerate cameras", e))?;

        let count = driver
            .child_count(list.raw())
            .map_err(|e| CaptureError::from_driver("count cameras", e))?;
        if count == 0 {
            return Err(CaptureError::NoCameraFound);
        }
        if count > 1 {
            debug!("{} cameras attached, using the first", count);
        }

        let camera = driver
            .child_at(list.raw(), 0)
            .map(|raw| DeviceHandle::adopt(driver.clone(), raw))
            .map_err(|e| CaptureError::from_driver("select camera", e))?;

        driver
            .open_session(camera.raw())
            .map_err(|e| CaptureError::from_driver("open session", e))?;
        let session = SessionGuard {
            driver: driver.clone(),
            camera: camera.raw(),
        };

        driver
            .send_command(camera.raw(), commands::EXTEND_SHUTDOWN_TIMER, 0)
            .map_err(|e| CaptureError::from_driver("extend shutdown timer", e))?;

        let handlers = HandlerGuard {
            driver: driver.clone(),
            camera: camera.raw(),
        };
        driver
            .set_object_event_handler(camera.raw(), Some(self.object_handler.clone()))
            .map_err(|e| CaptureError::from_driver("register object events", e))?;
        driver
            .set_state_event_handler(camera.raw(), Some(self.state_handler(camera.raw())))
            .map_err(|e| CaptureError::from_driver("register state events", e))?;

        driver
            .set_u32_property(camera.raw(), props::SAVE_TO, props::SAVE_TO_HOST)
            .map_err(|e| CaptureError::from_driver("set save destination", e))?;
        let actual = driver
            .get_u32_property(camera.raw(), props::SAVE_TO)
            .map_err(|e| CaptureError::from_driver("read save destination", e))?;
        if actual != props::SAVE_TO_HOST {
            return Err(CaptureError::CapabilityMismatch {
                property: "save destination",
                requested: props::SAVE_TO_HOST,
                actual,
            });
        }

        driver
            .set_capacity(camera.raw(), self.settings.capacity)
            .map_err(|e| CaptureError::from_driver("set host capacity", e))?;

        let model_name = driver
            .get_string_property(camera.raw(), props::PRODUCT_NAME)
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_MODEL.to_string());

        let pump = EventPump::new(
            driver.clone(),
            self.settings.pump_interval,
            self.settings.burst_log_interval,
        );
        pump.start()?;

        Ok(Connection {
            pump,
            _handlers: handlers,
            _session: session,
            _camera: camera,
            _list: list,
            _sdk: sdk,
            model_name,
        })
    }

    fn state_handler(&self, camera: RawRef) -> StateEventHandler {
        let lost = self.lost.clone();
        let driver = self.driver.clone();
        Arc::new(move |code, param| match code {
            state_codes::SHUTDOWN => {
                warn!("Camera shut down or was unplugged");
                lost.store(true, Ordering::SeqCst);
            }
            state_codes::WILL_SOON_SHUT_DOWN => {
                debug!("Camera about to power off, extending timer");
                if let Err(e) = driver.send_command(camera, commands::EXTEND_SHUTDOWN_TIMER, 0) {
                    warn!("Could not extend camera shutdown timer: {}", e);
                }
            }
            other => debug!("State event 0x{:04X} (param {})", other, param),
        })
    }

    /// Stop the pump, forget processed captures and release every handle
    pub fn disconnect(&self) {
        let connection = self.lock().connection.take();
        self.lost.store(false, Ordering::SeqCst);
        if let Some(connection) = connection {
            connection.pump.stop();
            self.state.reset_dedup();
            info!("Disconnected from {}", connection.model_name);
            drop(connection);
        }
    }

    /// Connected and the camera has not reported a shutdown
    pub fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::SeqCst) && self.lock().connection.is_some()
    }

    pub fn connected_model_name(&self) -> Option<String> {
        if !self.is_connected() {
            return None;
        }
        self.lock().connection.as_ref().map(|c| c.model_name.clone())
    }

    /// Reason the last connect attempt failed
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
