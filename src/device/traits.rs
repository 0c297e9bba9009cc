//! Camera driver boundary
//!
//! The vendor driver is consumed through the [`CameraDriver`] trait. The real
//! binding (an FFI wrapper around the vendor DLL) and the mock camera in
//! `testdb` both implement it, so the whole pipeline can be exercised without
//! hardware.
//!
//! Native objects are identified by [`RawRef`]. Ownership of a native object
//! is expressed with [`DeviceHandle`](super::handle::DeviceHandle); the trait
//! itself only deals in raw references.

use std::fmt::{self, Display};
use std::path::Path;
use std::sync::Arc;

/// Identifier of a native driver object (camera list, camera, directory item, stream)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawRef(pub u64);

impl Display for RawRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{:x}", self.0)
    }
}

/// Driver result codes
pub mod codes {
    /// Success (never carried by a [`DriverError`](super::DriverError))
    pub const OK: u32 = 0x0000_0000;
    /// Internal driver error
    pub const INTERNAL_ERROR: u32 = 0x0000_0002;
    /// Driver failed to allocate memory
    pub const MEM_ALLOC_FAILED: u32 = 0x0000_0003;
    /// Operation not supported by this driver or object
    pub const NOT_SUPPORTED: u32 = 0x0000_0007;
    /// File I/O failure inside the driver
    pub const FILE_IO_ERROR: u32 = 0x0000_0020;
    /// No device at the requested index
    pub const DEVICE_NOT_FOUND: u32 = 0x0000_0080;
    /// Device is busy; retry later
    pub const DEVICE_BUSY: u32 = 0x0000_0081;
    /// Communication port is held by another application
    pub const PORT_IN_USE: u32 = 0x0000_00C0;
    /// Session has not been opened
    pub const SESSION_NOT_OPEN: u32 = 0x0000_2003;
    /// Object exists but the device has not finished preparing it
    pub const OBJECT_NOT_READY: u32 = 0x0000_A102;
}

/// Property identifiers
pub mod props {
    /// Camera product name (string)
    pub const PRODUCT_NAME: u32 = 0x0000_0002;
    /// Where the camera stores new captures (u32)
    pub const SAVE_TO: u32 = 0x0000_000B;

    /// `SAVE_TO` value: store on the camera card
    pub const SAVE_TO_CAMERA: u32 = 1;
    /// `SAVE_TO` value: hand captures to the host
    pub const SAVE_TO_HOST: u32 = 2;
}

/// Camera commands
pub mod commands {
    /// Push back the camera's idle auto power-off
    pub const EXTEND_SHUTDOWN_TIMER: u32 = 0x0000_0001;
}

/// A nonzero driver result code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverError {
    code: u32,
}

impl Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.code)
    }
}

impl std::error::Error for DriverError {}

impl DriverError {
    /// Wrap a driver result code
    pub const fn new(code: u32) -> Self {
        Self { code }
    }

    /// Raw result code
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Busy and not-ready conditions clear up on their own and may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, codes::DEVICE_BUSY | codes::OBJECT_NOT_READY)
    }

    /// Whether the device (or its port) is held by someone else
    pub fn is_device_busy(&self) -> bool {
        matches!(self.code, codes::DEVICE_BUSY | codes::PORT_IN_USE)
    }

    /// Whether the driver does not implement the requested operation
    pub fn is_not_supported(&self) -> bool {
        self.code == codes::NOT_SUPPORTED
    }

    /// Short symbolic name for logs
    pub fn name(&self) -> &'static str {
        match self.code {
            codes::INTERNAL_ERROR => "internal error",
            codes::MEM_ALLOC_FAILED => "memory allocation failed",
            codes::NOT_SUPPORTED => "not supported",
            codes::FILE_IO_ERROR => "file I/O error",
            codes::DEVICE_NOT_FOUND => "device not found",
            codes::DEVICE_BUSY => "device busy",
            codes::PORT_IN_USE => "port in use",
            codes::SESSION_NOT_OPEN => "session not open",
            codes::OBJECT_NOT_READY => "object not ready",
            _ => "driver error",
        }
    }
}

/// Result of a driver call
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Convert a raw driver status into a result
pub fn check(code: u32) -> DriverResult<()> {
    if code == codes::OK {
        Ok(())
    } else {
        Err(DriverError::new(code))
    }
}

/// Metadata of a directory item on the camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemInfo {
    /// Size in bytes (0 when the device has not reported it yet)
    pub size: u64,
    /// Whether this item is a folder or volume
    pub is_container: bool,
    /// Group the item belongs to (e.g. RAW+JPEG pair)
    pub group_id: u32,
    /// Driver-specific option flags
    pub options: u32,
    /// File name as stored on the card
    pub file_name: String,
    /// Driver-specific format code
    pub format: u32,
    /// Capture time as seconds since the Unix epoch (0 if unknown)
    pub capture_timestamp: u64,
}

impl ItemInfo {
    /// Info for a plain file
    pub fn file(file_name: &str, size: u64) -> Self {
        Self {
            size,
            file_name: file_name.to_string(),
            ..Default::default()
        }
    }

    /// Info for a folder or volume
    pub fn container(file_name: &str) -> Self {
        Self {
            is_container: true,
            file_name: file_name.to_string(),
            ..Default::default()
        }
    }

    /// A non-container with a name and positive size can be downloaded as-is
    pub fn is_downloadable_file(&self) -> bool {
        !self.is_container && self.size > 0 && !self.file_name.is_empty()
    }

    /// Lower-cased extension of the file name, without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

/// Storage capacity hint some bodies require before they will transfer to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub free_clusters: i32,
    pub bytes_per_sector: i32,
    pub reset: bool,
}

impl Default for Capacity {
    fn default() -> Self {
        Self {
            free_clusters: 0x7FFF_FFFF,
            bytes_per_sector: 0x1000,
            reset: true,
        }
    }
}

/// How a disk-backed stream opens its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    /// Fail if the file exists
    CreateNew,
    /// Truncate or create
    CreateAlways,
}

/// One object event as delivered by the driver callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Object event code
    pub code: u32,
    /// Object the event refers to; ownership passes to the handler
    pub native_ref: Option<RawRef>,
    /// Opaque context registered with the handler
    pub context: usize,
}

/// Callback for object events
pub type ObjectEventHandler = Arc<dyn Fn(RawEvent) + Send + Sync>;

/// Callback for state events: `(event code, parameter)`
pub type StateEventHandler = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// The command/event surface of the vendor camera driver
///
/// Handlers registered here may be invoked from whichever thread calls
/// [`dispatch_events`](CameraDriver::dispatch_events), or from a thread the
/// driver owns.
pub trait CameraDriver: Send + Sync {
    /// Initialize the driver subsystem
    fn initialize(&self) -> DriverResult<()>;

    /// Shut the driver subsystem down
    fn terminate(&self) -> DriverResult<()>;

    /// Acquire the list of attached cameras
    fn camera_list(&self) -> DriverResult<RawRef>;

    /// Number of children of a list or container
    fn child_count(&self, parent: RawRef) -> DriverResult<u32>;

    /// Acquire the child at `index`
    fn child_at(&self, parent: RawRef, index: u32) -> DriverResult<RawRef>;

    /// Open a session with a camera
    fn open_session(&self, camera: RawRef) -> DriverResult<()>;

    /// Close a session with a camera
    fn close_session(&self, camera: RawRef) -> DriverResult<()>;

    /// Send a camera command
    fn send_command(&self, camera: RawRef, command: u32, param: i32) -> DriverResult<()>;

    /// Read an integer property
    fn get_u32_property(&self, object: RawRef, property: u32) -> DriverResult<u32>;

    /// Write an integer property
    fn set_u32_property(&self, object: RawRef, property: u32, value: u32) -> DriverResult<()>;

    /// Read a string property
    fn get_string_property(&self, object: RawRef, property: u32) -> DriverResult<String>;

    /// Tell the camera how much space the host has
    fn set_capacity(&self, camera: RawRef, capacity: Capacity) -> DriverResult<()>;

    /// Register (or clear, with `None`) the object event handler
    fn set_object_event_handler(
        &self,
        camera: RawRef,
        handler: Option<ObjectEventHandler>,
    ) -> DriverResult<()>;

    /// Register (or clear, with `None`) the state event handler
    fn set_state_event_handler(
        &self,
        camera: RawRef,
        handler: Option<StateEventHandler>,
    ) -> DriverResult<()>;

    /// Deliver pending events to the registered handlers
    fn dispatch_events(&self) -> DriverResult<()>;

    /// Read directory item metadata
    fn item_info(&self, item: RawRef) -> DriverResult<ItemInfo>;

    /// Create an in-memory stream with the given initial capacity
    fn create_memory_stream(&self, capacity: u64) -> DriverResult<RawRef>;

    /// Create a stream backed by a file on the host
    fn create_file_stream(&self, path: &Path, disposition: CreateDisposition)
        -> DriverResult<RawRef>;

    /// Transfer `size` bytes of `item` into `stream`
    fn download(&self, item: RawRef, size: u64, stream: RawRef) -> DriverResult<()>;

    /// Acknowledge a finished transfer
    fn download_complete(&self, item: RawRef) -> DriverResult<()>;

    /// Abandon a transfer, leaving the item on the camera
    fn download_cancel(&self, item: RawRef) -> DriverResult<()>;

    /// Copy the stream's bytes out through its direct pointer
    fn stream_pointer_copy(&self, stream: RawRef) -> DriverResult<Vec<u8>>;

    /// Number of bytes held by the stream
    fn stream_length(&self, stream: RawRef) -> DriverResult<u64>;

    /// Move the stream position back to the start
    fn stream_rewind(&self, stream: RawRef) -> DriverResult<()>;

    /// Read up to `len` bytes from the current stream position
    fn stream_read(&self, stream: RawRef, len: u64) -> DriverResult<Vec<u8>>;

    /// Delete an item from the camera; the driver retires its reference
    fn delete_item(&self, item: RawRef) -> DriverResult<()>;

    /// Release a reference
    fn release(&self, object: RawRef) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_codes() {
        assert!(DriverError::new(codes::DEVICE_BUSY).is_retryable());
        assert!(DriverError::new(codes::OBJECT_NOT_READY).is_retryable());
        assert!(!DriverError::new(codes::INTERNAL_ERROR).is_retryable());
        assert!(!DriverError::new(codes::PORT_IN_USE).is_retryable());
    }

    #[test]
    fn test_check_maps_zero_to_ok() {
        assert!(check(codes::OK).is_ok());
        assert_eq!(
            check(codes::DEVICE_BUSY),
            Err(DriverError::new(codes::DEVICE_BUSY))
        );
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new(codes::OBJECT_NOT_READY);
        assert_eq!(err.to_string(), "object not ready (0x0000A102)");

        let unknown = DriverError::new(0xDEAD);
        assert_eq!(unknown.to_string(), "driver error (0x0000DEAD)");
    }

    #[test]
    fn test_item_info_helpers() {
        let file = ItemInfo::file("IMG_0001.JPG", 500_000);
        assert!(file.is_downloadable_file());
        assert_eq!(file.extension(), Some("jpg".to_string()));

        let empty = ItemInfo::file("IMG_0002.JPG", 0);
        assert!(!empty.is_downloadable_file());

        let folder = ItemInfo::container("100CANON");
        assert!(!folder.is_downloadable_file());
        assert_eq!(folder.extension(), None);
    }
}
