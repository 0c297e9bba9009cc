//! Sequence number allocation
//!
//! Captures of a part are numbered from 103 upward. The allocator fills the
//! lowest free number instead of always incrementing, so deleted captures give
//! their number back.

use crate::core::session::{SequenceFn, SettleFn};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use walkdir::WalkDir;

/// First number handed out for a part
pub const FIRST_SEQUENCE: u32 = 103;

/// Stride used when the known numbers cannot be listed
pub const FALLBACK_STRIDE: u32 = 2;

/// Smallest number >= 103 that is not already used
pub fn next_free_sequence(existing: &[u32]) -> u32 {
    let used: BTreeSet<u32> = existing.iter().copied().collect();
    let mut candidate = FIRST_SEQUENCE;
    for n in used.range(FIRST_SEQUENCE..) {
        if *n != candidate {
            break;
        }
        candidate = candidate.saturating_add(1);
    }
    candidate
}

/// Watermark allocation used when the store is unavailable: `max + 2`, or 103
pub fn fallback_sequence(existing: &[u32]) -> u32 {
    existing
        .iter()
        .max()
        .map(|max| max.saturating_add(FALLBACK_STRIDE))
        .unwrap_or(FIRST_SEQUENCE)
}

/// Lists the sequence numbers already in use for a part
pub trait SequenceStore: Send + Sync {
    fn sequences(&self, part_number: &str) -> io::Result<Vec<u32>>;
}

// ============================================================================
// Directory-backed store
// ============================================================================

/// Reads used numbers from the files in `{root}/{part}`
#[derive(Debug, Clone)]
pub struct DirectorySequenceStore {
    root: PathBuf,
}

impl DirectorySequenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SequenceStore for DirectorySequenceStore {
    fn sequences(&self, part_number: &str) -> io::Result<Vec<u32>> {
        let dir = self.root.join(part_number);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(seq) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_sequence(part_number, name))
            {
                found.push(seq);
            }
        }
        found.sort_unstable();
        Ok(found)
    }
}

/// Parse `{part}.{NNN}` or `{part}.{NNN}.{ext}`; thumbnails and other
/// multi-suffix names yield `None`
pub fn parse_sequence(part_number: &str, file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(part_number)?.strip_prefix('.')?;
    let (digits, tail) = match rest.find('.') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || tail.contains('.') {
        return None;
    }
    digits.parse().ok()
}

// ============================================================================
// Allocator
// ============================================================================

/// Allocates numbers from a [`SequenceStore`], remembering the last listing per
/// part for when the store fails.
///
/// Numbers handed out by [`allocate`](Self::allocate) stay pending until they
/// are settled, so concurrent downloads never receive the same number before
/// either file lands on disk. Once settled a number is free again unless its
/// file is on disk.
pub struct SequenceAllocator {
    store: Arc<dyn SequenceStore>,
    last_known: Mutex<HashMap<String, Vec<u32>>>,
    pending: Mutex<HashMap<String, BTreeSet<u32>>>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self {
            store,
            last_known: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Numbers in use for a part. The bool is false when the store failed and
    /// the cached listing was used instead.
    fn known(&self, part_number: &str) -> (Vec<u32>, bool) {
        match self.store.sequences(part_number) {
            Ok(list) => {
                self.last_known
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(part_number.to_string(), list.clone());
                (list, true)
            }
            Err(e) => {
                warn!("Could not list sequences for {}: {}", part_number, e);
                let cached = self
                    .last_known
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(part_number)
                    .cloned()
                    .unwrap_or_default();
                (cached, false)
            }
        }
    }

    /// Next number for a part, without holding it
    pub fn next_sequence(&self, part_number: &str) -> u32 {
        let (known, fresh) = self.known(part_number);
        if fresh {
            next_free_sequence(&known)
        } else {
            fallback_sequence(&known)
        }
    }

    /// Next number for a part, held as pending until [`settle`](Self::settle)
    pub fn allocate(&self, part_number: &str) -> u32 {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let held = pending.entry(part_number.to_string()).or_default();
        let (mut known, fresh) = self.known(part_number);
        known.extend(held.iter().copied());
        let next = if fresh {
            next_free_sequence(&known)
        } else {
            fallback_sequence(&known)
        };
        held.insert(next);
        debug!("Allocated sequence {} for part {}", next, part_number);
        next
    }

    /// Stop holding `sequence`. With `on_disk` the number is also added to the
    /// cached listing, so it stays used while the store is unavailable.
    pub fn settle(&self, part_number: &str, sequence: u32, on_disk: bool) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = pending.get_mut(part_number) {
            held.remove(&sequence);
            if held.is_empty() {
                pending.remove(part_number);
            }
        }
        if on_disk {
            let mut cache = self.last_known.lock().unwrap_or_else(PoisonError::into_inner);
            let known = cache.entry(part_number.to_string()).or_default();
            if let Err(i) = known.binary_search(&sequence) {
                known.insert(i, sequence);
            }
        }
        debug!(
            "Sequence {} for part {} settled ({})",
            sequence,
            part_number,
            if on_disk { "saved" } else { "returned" }
        );
    }

    /// Numbers currently held for a part
    pub fn pending(&self, part_number: &str) -> Vec<u32> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(part_number)
            .map(|held| held.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sequence and settle functions for a session bound to `part_number`
    pub fn session_fns(self: &Arc<Self>, part_number: &str) -> (SequenceFn, SettleFn) {
        let allocator = Arc::clone(self);
        let part = part_number.to_string();
        let next: SequenceFn = Arc::new(move || allocator.allocate(&part));

        let allocator = Arc::clone(self);
        let part = part_number.to_string();
        let settle: SettleFn = Arc::new(move |sequence, on_disk| allocator.settle(&part, sequence, on_disk));

        (next, settle)
    }
}
