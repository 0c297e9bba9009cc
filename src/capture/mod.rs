//! Capture pipeline
//!
//! A transfer event travels classifier -> dispatcher -> resolver ->
//! orchestrator, and ends as a [`notifier::CapturedArtifact`] on disk or as a
//! logged abort with the image left on the camera.

pub mod classifier;
pub mod download;
pub mod notifier;
pub mod resolver;
pub mod thumbnail;

pub use classifier::{DownloadDispatcher, DownloadSink, EventClassifier};
pub use download::{DownloadOrchestrator, TransferSettings, TransferStage};
pub use notifier::{CapturedArtifact, PhotoNotifier};
pub use resolver::{ResolvedItem, TransferResolver};
pub use thumbnail::ThumbnailGenerator;
