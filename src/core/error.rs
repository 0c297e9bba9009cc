//! Error types for the capture station
//!
//! Connection-level failures surface to callers of `connect` through
//! [`CaptureError`]. Transfer failures stay inside the download orchestrator
//! and are only ever logged.

use crate::device::traits::DriverError;
use thiserror::Error;

/// Main error type for the capture station
#[derive(Error, Debug)]
pub enum CaptureError {
    /// A driver call failed with a non-retryable code
    #[error("{operation} failed: {source}")]
    Driver {
        /// Driver operation that failed (e.g. "open session")
        operation: &'static str,
        /// Underlying driver error
        source: DriverError,
    },

    /// No camera is attached to the host
    #[error("No camera found. Check the USB cable and that the camera is switched on.")]
    NoCameraFound,

    /// The camera is held by another application or still busy
    #[error("Camera is busy during {operation}. Close any other camera software (EOS Utility, Lightroom tether) and try again.")]
    DeviceBusy {
        /// Driver operation that reported the busy condition
        operation: &'static str,
    },

    /// A capability was written but the device reported a different value back
    #[error("Camera did not accept {property}: requested {requested}, device reports {actual}")]
    CapabilityMismatch {
        /// Human readable property name
        property: &'static str,
        /// Value that was written
        requested: u32,
        /// Value read back
        actual: u32,
    },

    /// General I/O error
    #[error("IO error: {0}")]
    Io(String),
}

impl CaptureError {
    /// Classify a failed driver call made while connecting.
    ///
    /// Busy and port-in-use codes become [`CaptureError::DeviceBusy`] so the
    /// UI can tell the operator to free the camera.
    pub fn from_driver(operation: &'static str, source: DriverError) -> Self {
        if source.is_device_busy() {
            CaptureError::DeviceBusy { operation }
        } else {
            CaptureError::Driver { operation, source }
        }
    }

    /// Whether this error indicates another application holds the device
    pub fn is_device_busy(&self) -> bool {
        matches!(self, CaptureError::DeviceBusy { .. })
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CaptureError>;

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::traits::codes;

    #[test]
    fn test_busy_codes_map_to_device_busy() {
        let err = CaptureError::from_driver("open session", DriverError::new(codes::DEVICE_BUSY));
        assert!(err.is_device_busy());

        let err = CaptureError::from_driver("open session", DriverError::new(codes::PORT_IN_USE));
        assert!(err.is_device_busy());
    }

    #[test]
    fn test_other_codes_stay_driver_errors() {
        let err = CaptureError::from_driver("initialize", DriverError::new(codes::INTERNAL_ERROR));
        assert!(!err.is_device_busy());
        assert!(err.to_string().contains("initialize"));
        assert!(err.to_string().contains("0x00000002"));
    }

    #[test]
    fn test_io_errors_convert() {
        let err: CaptureError = std::io::Error::new(std::io::ErrorKind::Other, "thread limit").into();
        assert!(matches!(err, CaptureError::Io(_)));
        assert!(err.to_string().contains("thread limit"));
    }
}
