//! Photo-ready notifications
//!
//! Every committed download produces one [`CapturedArtifact`], fanned out to
//! all current subscribers.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// A capture that is safely on disk and gone from the camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedArtifact {
    /// Full-size image
    pub full_image_path: PathBuf,
    /// Preview, if one could be generated
    pub thumbnail_path: Option<PathBuf>,
    /// Part number the capture was filed under
    pub part_number: String,
    /// Sequence number in the file name
    pub sequence: u32,
    /// Verified size on disk
    pub bytes: u64,
    /// When the file was committed
    pub captured_at: DateTime<Utc>,
}

/// Fans artifacts out to subscribers
#[derive(Debug, Default)]
pub struct PhotoNotifier {
    subscribers: Mutex<Vec<Sender<CapturedArtifact>>>,
}

impl PhotoNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every artifact committed from now on
    pub fn subscribe(&self) -> Receiver<CapturedArtifact> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver an artifact; returns how many subscribers received it.
    /// Subscribers whose receiver was dropped are removed.
    pub fn notify(&self, artifact: &CapturedArtifact) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(artifact.clone()).is_ok());
        trace!(
            "Photo ready {} sent to {} subscriber(s)",
            artifact.full_image_path.display(),
            subscribers.len()
        );
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(seq: u32) -> CapturedArtifact {
        CapturedArtifact {
            full_image_path: PathBuf::from(format!("/c/P/P.{}.JPG", seq)),
            thumbnail_path: None,
            part_number: "P".to_string(),
            sequence: seq,
            bytes: 10,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_all_subscribers_receive() {
        let notifier = PhotoNotifier::new();
        let a = notifier.subscribe();
        let b = notifier.subscribe();

        assert_eq!(notifier.notify(&artifact(103)), 2);
        assert_eq!(a.try_recv().unwrap().sequence, 103);
        assert_eq!(b.try_recv().unwrap().sequence, 103);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let notifier = PhotoNotifier::new();
        let kept = notifier.subscribe();
        drop(notifier.subscribe());

        assert_eq!(notifier.notify(&artifact(103)), 1);
        assert_eq!(notifier.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_artifact_serializes() {
        let json = serde_json::to_string(&artifact(105)).unwrap();
        assert!(json.contains("\"sequence\":105"));
        assert!(json.contains("\"thumbnail_path\":null"));
    }
}
