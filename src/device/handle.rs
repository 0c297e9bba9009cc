//! Owned native references
//!
//! A [`DeviceHandle`] owns exactly one driver reference and releases it when
//! dropped. Every way of giving the reference up consumes the handle, so a
//! reference cannot be released twice or used after the driver retired it.

use super::traits::{CameraDriver, DriverError, RawRef};
use log::{trace, warn};
use std::fmt;
use std::sync::Arc;

/// Exclusive owner of a native driver reference
pub struct DeviceHandle {
    raw: RawRef,
    driver: Arc<dyn CameraDriver>,
    consumed: bool,
}

impl DeviceHandle {
    /// Take ownership of a reference the driver handed out
    pub fn adopt(driver: Arc<dyn CameraDriver>, raw: RawRef) -> Self {
        Self {
            raw,
            driver,
            consumed: false,
        }
    }

    /// The underlying reference, for passing to driver calls
    pub fn raw(&self) -> RawRef {
        self.raw
    }

    /// Release the reference now instead of at end of scope
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Give up ownership without releasing.
    ///
    /// Used when another owner is already responsible for the same reference.
    pub fn relinquish(mut self) -> RawRef {
        self.consumed = true;
        self.raw
    }

    /// Delete the item on the device.
    ///
    /// On success the driver retires the reference and it must not be released
    /// again. On failure the handle comes back so it is still released once.
    pub fn delete_source(mut self) -> Result<(), (DeviceHandle, DriverError)> {
        match self.driver.delete_item(self.raw) {
            Ok(()) => {
                self.consumed = true;
                trace!("{} deleted on device, driver retired the reference", self.raw);
                Ok(())
            }
            Err(e) => Err((self, e)),
        }
    }

    fn release_inner(&mut self) {
        if self.consumed {
            return;
        }
        self.consumed = true;
        if let Err(e) = self.driver.release(self.raw) {
            warn!("Release of {} failed: {}", self.raw, e);
        } else {
            trace!("Released {}", self.raw);
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("raw", &self.raw)
            .field("consumed", &self.consumed)
            .finish()
    }
}
