//! Capture Station Library
//!
//! Tethered capture for a photography station: every image the attached
//! camera takes is downloaded into a folder named after the part number
//! being photographed, verified on disk, and only then removed from the
//! camera's card.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`core`] - Configuration, errors, part-number sessions, sequence
//!   allocation and the [`core::CaptureStation`] facade
//! - [`device`] - The camera driver boundary, owned object handles, the
//!   event table, the connection manager and the event pump
//! - [`capture`] - Event classification, transfer resolution, the download
//!   state machine, thumbnails and photo-ready notifications
//! - [`cli`] - Command-line interface (only used by the binary)
//! - [`testdb`] - A simulated camera and image fixtures
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use capture_station::core::config::Config;
//! use capture_station::core::CaptureStation;
//! use capture_station::device::CameraDriver;
//! use std::sync::Arc;
//!
//! fn run(driver: Arc<dyn CameraDriver>) -> anyhow::Result<()> {
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let config = Config::load_default()?;
//!     let station = CaptureStation::new(driver, &config, runtime.handle().clone());
//!
//!     station.connect(false)?;
//!     station.bind_part("639808GT");
//!
//!     for photo in station.subscribe() {
//!         println!("{} saved", photo.full_image_path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Testing Without a Camera
//!
//! [`testdb::MockCamera`] implements the driver trait in memory and can
//! script busy cameras, failing streams and missing devices. The `simulate`
//! CLI command runs the whole pipeline against it.

pub mod capture;
pub mod cli;
pub mod core;
pub mod device;
pub mod testdb;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
