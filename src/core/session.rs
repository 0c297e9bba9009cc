//! Session context and deduplication state
//!
//! The active part number, its sequence function and the output root form the
//! [`SessionContext`]. The context and both dedup sets live behind one mutex in
//! [`CaptureState`] so a download's reference claim and its path reservation
//! are always consistent with the session they were made under.

use crate::device::traits::RawRef;
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Produces the next sequence number for the bound part
pub type SequenceFn = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Told when a download is done with a number: `(sequence, on_disk)`
pub type SettleFn = Arc<dyn Fn(u32, bool) + Send + Sync>;

// ============================================================================
// Session context
// ============================================================================

/// The part being photographed and where its captures go
#[derive(Clone)]
pub struct SessionContext {
    part_number: String,
    next_sequence: SequenceFn,
    settle: Option<SettleFn>,
    output_root: PathBuf,
}

impl SessionContext {
    pub fn new(part_number: impl Into<String>, next_sequence: SequenceFn, output_root: impl Into<PathBuf>) -> Self {
        Self {
            part_number: part_number.into(),
            next_sequence,
            settle: None,
            output_root: output_root.into(),
        }
    }

    /// Report every number taken from `next_sequence` back to `settle` once
    /// its download is saved or aborted
    pub fn with_settle(mut self, settle: SettleFn) -> Self {
        self.settle = Some(settle);
        self
    }

    pub fn part_number(&self) -> &str {
        &self.part_number
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Folder holding this part's captures: `{root}/{part}`
    pub fn part_dir(&self) -> PathBuf {
        self.output_root.join(&self.part_number)
    }

    /// Ask the bound sequence function for a number
    pub fn next_sequence(&self) -> u32 {
        (self.next_sequence)()
    }

    /// Hand a number back to the sequence source. `on_disk` is true when its
    /// file exists.
    pub fn settle_sequence(&self, sequence: u32, on_disk: bool) {
        if let Some(settle) = &self.settle {
            settle(sequence, on_disk);
        }
    }

    /// Output path for a sequence: `{root}/{part}/{part}.{seq:03}{ext}`
    ///
    /// `ext` includes the leading dot, or is empty.
    pub fn output_path(&self, sequence: u32, ext: &str) -> PathBuf {
        self.part_dir()
            .join(format!("{}.{:03}{}", self.part_number, sequence, ext))
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("part_number", &self.part_number)
            .field("output_root", &self.output_root)
            .finish()
    }
}

// ============================================================================
// Dedup state
// ============================================================================

/// References and output paths already processed under the current session
#[derive(Debug, Default)]
pub struct DedupState {
    processed_refs: HashSet<RawRef>,
    processed_paths: HashSet<PathBuf>,
}

impl DedupState {
    fn clear(&mut self) {
        self.processed_refs.clear();
        self.processed_paths.clear();
    }
}

/// Outcome of claiming a native reference for download
#[derive(Debug, Clone)]
pub enum Claim {
    /// No part number is bound; the capture is dropped
    NoSession,
    /// The reference was already claimed under this session
    Duplicate,
    /// The item was deleted from the camera; the driver owns the reference
    Retired,
    /// The reference is now owned by a download under this session
    Accepted(Arc<SessionContext>),
}

#[derive(Debug, Default)]
struct Shared {
    session: Option<Arc<SessionContext>>,
    dedup: DedupState,
    // Items deleted on the camera during this connection. Survives session
    // replacement.
    retired_refs: HashSet<RawRef>,
}

/// Process-wide capture state: the swappable session cell and the dedup sets
#[derive(Debug, Default)]
pub struct CaptureState {
    inner: Mutex<Shared>,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the session wholesale; dedup sets are cleared
    pub fn set_session(&self, context: SessionContext) {
        let mut shared = self.lock();
        debug!(
            "Session bound to part {} under {}",
            context.part_number(),
            context.output_root().display()
        );
        shared.session = Some(Arc::new(context));
        shared.dedup.clear();
    }

    /// Unbind the session; later captures are dropped until a new one is set
    pub fn clear_session(&self) {
        let mut shared = self.lock();
        shared.session = None;
        shared.dedup.clear();
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<Arc<SessionContext>> {
        self.lock().session.clone()
    }

    /// Forget processed, reserved and retired state, keeping the session.
    /// Called when the camera connection is torn down.
    pub fn reset_dedup(&self) {
        let mut shared = self.lock();
        shared.dedup.clear();
        shared.retired_refs.clear();
    }

    /// Claim a reference for download under the current session
    pub fn claim_ref(&self, raw: RawRef) -> Claim {
        let mut shared = self.lock();
        if shared.retired_refs.contains(&raw) {
            return Claim::Retired;
        }
        let Some(session) = shared.session.clone() else {
            return Claim::NoSession;
        };
        if !shared.dedup.processed_refs.insert(raw) {
            return Claim::Duplicate;
        }
        Claim::Accepted(session)
    }

    /// Reserve an output path; false when another download already holds it
    pub fn reserve_path(&self, path: &Path) -> bool {
        self.lock().dedup.processed_paths.insert(path.to_path_buf())
    }

    /// Give a reservation back after an aborted download
    pub fn release_path(&self, path: &Path) {
        self.lock().dedup.processed_paths.remove(path);
    }

    /// Record that the driver retired `raw` by deleting its item
    pub fn retire_ref(&self, raw: RawRef) {
        self.lock().retired_refs.insert(raw);
    }

    pub fn is_ref_retired(&self, raw: RawRef) -> bool {
        self.lock().retired_refs.contains(&raw)
    }

    pub fn is_ref_processed(&self, raw: RawRef) -> bool {
        self.lock().dedup.processed_refs.contains(&raw)
    }

    pub fn is_path_reserved(&self, path: &Path) -> bool {
        self.lock().dedup.processed_paths.contains(path)
    }
}
