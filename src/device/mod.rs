//! Camera driver interaction
//!
//! Everything that talks to the vendor driver goes through the
//! [`CameraDriver`] trait, so the pipeline runs the same against a real
//! camera binding or the simulated camera in `testdb`.
//!
//! # Submodules
//!
//! - `traits` - Driver abstraction, result codes and property ids
//! - `handle` - Owned object references released exactly once
//! - `events` - Object/state event codes and transfer eligibility
//! - `pump` - Background event dispatch
//! - `connection` - Connect/disconnect lifecycle

pub mod connection;
pub mod events;
pub mod handle;
pub mod pump;
pub mod traits;

pub use connection::{ConnectionSettings, SessionManager};
pub use events::{EventPolicy, SemanticEvent};
pub use handle::DeviceHandle;
pub use traits::{CameraDriver, DriverError, DriverResult, ItemInfo, RawEvent, RawRef};
