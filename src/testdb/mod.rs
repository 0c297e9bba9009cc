//! Test Database Module
//!
//! A simulated camera and image fixtures for exercising the whole capture
//! pipeline without a camera on the USB port.
//!
//! # Features
//!
//! - **Mock Camera**: [`MockCamera`] implements the driver trait with an
//!   in-memory card, scripted failures and reference accounting
//! - **Fixtures**: real JPEG bytes at any size, for downloads and thumbnails
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use capture_station::core::config::Config;
//! use capture_station::core::CaptureStation;
//! use capture_station::testdb::MockCamera;
//! use std::sync::Arc;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let camera = Arc::new(MockCamera::new());
//! let station = CaptureStation::new(camera.clone(), &Config::default(), runtime.handle().clone());
//!
//! station.connect(false).unwrap();
//! station.bind_part("639808GT");
//! let photos = station.subscribe();
//!
//! camera.capture("IMG_0001.JPG", vec![0xFF; 1024]);
//! let artifact = photos.recv().unwrap();
//! println!("saved {}", artifact.full_image_path.display());
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_camera;

#[cfg(test)]
mod integration;

pub use fixtures::{jpeg_bytes, pad_jpeg, padded_jpeg};
pub use mock_camera::{DeleteHook, MockCamera, MockCameraConfig};
