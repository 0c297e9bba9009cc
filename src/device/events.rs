//! Driver event codes and their meaning
//!
//! Object events arrive as bare integers. [`SemanticEvent::from_code`] maps them
//! onto a closed set of kinds and [`EventPolicy`] decides which kinds may start
//! a download.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Object event codes
pub mod object_codes {
    pub const VOLUME_INFO_CHANGED: u32 = 0x0201;
    pub const VOLUME_UPDATE_ITEMS: u32 = 0x0202;
    pub const FOLDER_UPDATE_ITEMS: u32 = 0x0203;
    pub const DIR_ITEM_CREATED: u32 = 0x0204;
    pub const DIR_ITEM_REMOVED: u32 = 0x0205;
    pub const DIR_ITEM_INFO_CHANGED: u32 = 0x0206;
    pub const DIR_ITEM_CONTENT_CHANGED: u32 = 0x0207;
    pub const DIR_ITEM_REQUEST_TRANSFER: u32 = 0x0208;
    pub const DIR_ITEM_REQUEST_TRANSFER_DT: u32 = 0x0209;
    pub const DIR_ITEM_CANCEL_TRANSFER_DT: u32 = 0x020A;
    pub const VOLUME_ADDED: u32 = 0x020C;
    pub const VOLUME_REMOVED: u32 = 0x020D;
}

/// State event codes
pub mod state_codes {
    pub const SHUTDOWN: u32 = 0x0301;
    pub const JOB_STATUS_CHANGED: u32 = 0x0302;
    pub const WILL_SOON_SHUT_DOWN: u32 = 0x0303;
    pub const SHUTDOWN_TIMER_UPDATE: u32 = 0x0304;
    pub const CAPTURE_ERROR: u32 = 0x0305;
    pub const INTERNAL_ERROR: u32 = 0x0306;
}

/// Meaning of an object event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticEvent {
    VolumeInfoChanged,
    VolumeUpdateItems,
    FolderUpdateItems,
    DirItemCreated,
    DirItemRemoved,
    DirItemInfoChanged,
    DirItemContentChanged,
    TransferRequested,
    TransferRequestedWithDateTime,
    TransferCancelled,
    VolumeAdded,
    VolumeRemoved,
    /// Code not in the table
    Unhandled(u32),
}

impl SemanticEvent {
    /// Map a raw object event code
    pub fn from_code(code: u32) -> Self {
        use object_codes::*;
        match code {
            VOLUME_INFO_CHANGED => SemanticEvent::VolumeInfoChanged,
            VOLUME_UPDATE_ITEMS => SemanticEvent::VolumeUpdateItems,
            FOLDER_UPDATE_ITEMS => SemanticEvent::FolderUpdateItems,
            DIR_ITEM_CREATED => SemanticEvent::DirItemCreated,
            DIR_ITEM_REMOVED => SemanticEvent::DirItemRemoved,
            DIR_ITEM_INFO_CHANGED => SemanticEvent::DirItemInfoChanged,
            DIR_ITEM_CONTENT_CHANGED => SemanticEvent::DirItemContentChanged,
            DIR_ITEM_REQUEST_TRANSFER => SemanticEvent::TransferRequested,
            DIR_ITEM_REQUEST_TRANSFER_DT => SemanticEvent::TransferRequestedWithDateTime,
            DIR_ITEM_CANCEL_TRANSFER_DT => SemanticEvent::TransferCancelled,
            VOLUME_ADDED => SemanticEvent::VolumeAdded,
            VOLUME_REMOVED => SemanticEvent::VolumeRemoved,
            other => SemanticEvent::Unhandled(other),
        }
    }

    /// Kinds that always announce a new file
    pub fn is_transfer_kind(&self) -> bool {
        matches!(
            self,
            SemanticEvent::TransferRequested
                | SemanticEvent::TransferRequestedWithDateTime
                | SemanticEvent::DirItemCreated
        )
    }

    /// Volume kinds some bodies emit in place of a transfer request
    pub fn is_provisional_transfer_kind(&self) -> bool {
        matches!(
            self,
            SemanticEvent::VolumeInfoChanged | SemanticEvent::VolumeUpdateItems
        )
    }
}

impl Display for SemanticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticEvent::Unhandled(code) => write!(f, "Unhandled(0x{:04X})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Which events are allowed to trigger a download
///
/// The two volume-change kinds sometimes accompany a real capture on some
/// bodies and sometimes do not. Whether they count is decided here and
/// nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventPolicy {
    /// Treat `VolumeInfoChanged`/`VolumeUpdateItems` as transfer requests
    pub volume_events_trigger_transfer: bool,

    /// Codes known to be spurious for the attached driver; always discarded
    pub ignored_codes: Vec<u32>,
}

impl Default for EventPolicy {
    fn default() -> Self {
        Self {
            volume_events_trigger_transfer: true,
            ignored_codes: Vec::new(),
        }
    }
}

impl EventPolicy {
    /// Only the documented transfer kinds trigger downloads
    pub fn strict() -> Self {
        Self {
            volume_events_trigger_transfer: false,
            ignored_codes: Vec::new(),
        }
    }

    /// Decide whether an event with this code and kind should be downloaded
    pub fn is_transfer_eligible(&self, code: u32, kind: SemanticEvent) -> bool {
        if self.ignored_codes.contains(&code) {
            return false;
        }
        kind.is_transfer_kind()
            || (self.volume_events_trigger_transfer && kind.is_provisional_transfer_kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        let cases = vec![
            (0x201, SemanticEvent::VolumeInfoChanged),
            (0x202, SemanticEvent::VolumeUpdateItems),
            (0x203, SemanticEvent::FolderUpdateItems),
            (0x204, SemanticEvent::DirItemCreated),
            (0x205, SemanticEvent::DirItemRemoved),
            (0x206, SemanticEvent::DirItemInfoChanged),
            (0x207, SemanticEvent::DirItemContentChanged),
            (0x208, SemanticEvent::TransferRequested),
            (0x209, SemanticEvent::TransferRequestedWithDateTime),
            (0x20A, SemanticEvent::TransferCancelled),
            (0x20C, SemanticEvent::VolumeAdded),
            (0x20D, SemanticEvent::VolumeRemoved),
            (0x20B, SemanticEvent::Unhandled(0x20B)),
            (0x999, SemanticEvent::Unhandled(0x999)),
        ];

        for (code, expected) in cases {
            assert_eq!(SemanticEvent::from_code(code), expected, "code 0x{:X}", code);
        }
    }

    #[test]
    fn test_default_policy_accepts_volume_events() {
        let policy = EventPolicy::default();

        for code in [0x204, 0x208, 0x209, 0x201, 0x202] {
            let kind = SemanticEvent::from_code(code);
            assert!(policy.is_transfer_eligible(code, kind), "code 0x{:X}", code);
        }

        for code in [0x203, 0x205, 0x206, 0x207, 0x20A, 0x20C, 0x20D, 0x777] {
            let kind = SemanticEvent::from_code(code);
            assert!(!policy.is_transfer_eligible(code, kind), "code 0x{:X}", code);
        }
    }

    #[test]
    fn test_strict_policy_rejects_volume_events() {
        let policy = EventPolicy::strict();
        assert!(!policy.is_transfer_eligible(0x201, SemanticEvent::VolumeInfoChanged));
        assert!(!policy.is_transfer_eligible(0x202, SemanticEvent::VolumeUpdateItems));
        assert!(policy.is_transfer_eligible(0x204, SemanticEvent::DirItemCreated));
    }

    #[test]
    fn test_ignored_codes_override_kind() {
        let policy = EventPolicy {
            ignored_codes: vec![0x204],
            ..Default::default()
        };
        assert!(!policy.is_transfer_eligible(0x204, SemanticEvent::DirItemCreated));
        assert!(policy.is_transfer_eligible(0x208, SemanticEvent::TransferRequested));
    }

    #[test]
    fn test_display() {
        assert_eq!(SemanticEvent::DirItemCreated.to_string(), "DirItemCreated");
        assert_eq!(SemanticEvent::Unhandled(0x42).to_string(), "Unhandled(0x0042)");
    }
}
