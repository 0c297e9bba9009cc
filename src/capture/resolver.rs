//! Transfer resolution
//!
//! A transfer event may name the new file directly or a folder that contains
//! it. The resolver turns either into a single downloadable file handle.

use crate::core::retry::{RetryExhausted, RetryPolicy};
use crate::device::handle::DeviceHandle;
use crate::device::traits::{CameraDriver, ItemInfo, RawRef};
use log::{debug, trace, warn};
use std::path::Path;
use std::sync::Arc;

/// How deep nested folders are searched before giving up
const MAX_SEARCH_DEPTH: usize = 16;

/// A file item ready for download, with the metadata it was resolved from
#[derive(Debug)]
pub struct ResolvedItem {
    pub handle: DeviceHandle,
    pub info: ItemInfo,
}

/// Resolves event references to downloadable files
pub struct TransferResolver {
    driver: Arc<dyn CameraDriver>,
    retry: RetryPolicy,
    accepted_extensions: Vec<String>,
}

impl TransferResolver {
    pub fn new(driver: Arc<dyn CameraDriver>, retry: RetryPolicy, accepted_extensions: &[String]) -> Self {
        Self {
            driver,
            retry,
            accepted_extensions: accepted_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Read item metadata, retrying while the camera is busy or still
    /// finalizing the item
    pub fn item_info(&self, raw: RawRef) -> Result<ItemInfo, RetryExhausted> {
        self.retry.run("item info", |_| self.driver.item_info(raw))
    }

    fn is_accepted(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.accepted_extensions.iter().any(|a| *a == ext)
            })
            .unwrap_or(false)
    }

    /// Resolve an event's reference to a file.
    ///
    /// Consumes the handle: it is either returned inside the result or
    /// released before this returns.
    pub fn resolve(&self, handle: DeviceHandle) -> Option<ResolvedItem> {
        let info = match self.item_info(handle.raw()) {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    "Could not read info for {} after {} attempts: {}",
                    handle.raw(),
                    e.attempts,
                    e.last_error
                );
                return None;
            }
        };

        if info.is_downloadable_file() {
            trace!("{} is {} ({} bytes)", handle.raw(), info.file_name, info.size);
            return Some(ResolvedItem { handle, info });
        }

        if !info.is_container {
            debug!(
                "{} ({:?}, {} bytes) is not a downloadable file",
                handle.raw(),
                info.file_name,
                info.size
            );
            return None;
        }

        debug!("{} is folder {}, searching for an image", handle.raw(), info.file_name);
        let found = self.search(&handle, 0);
        if found.is_none() {
            warn!("No image found under folder {}", info.file_name);
        }
        found
    }

    /// Depth-first search for the first accepted image under `parent`.
    /// Every child that is not returned is released before moving on.
    fn search(&self, parent: &DeviceHandle, depth: usize) -> Option<ResolvedItem> {
        if depth >= MAX_SEARCH_DEPTH {
            warn!("Folder nesting deeper than {} under {}", MAX_SEARCH_DEPTH, parent.raw());
            return None;
        }

        let count = match self.driver.child_count(parent.raw()) {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count children of {}: {}", parent.raw(), e);
                return None;
            }
        };

        for index in 0..count {
            let child = match self.driver.child_at(parent.raw(), index) {
                Ok(raw) => DeviceHandle::adopt(self.driver.clone(), raw),
                Err(e) => {
                    debug!("Child {} of {} unavailable: {}", index, parent.raw(), e);
                    continue;
                }
            };

            let info = match self.item_info(child.raw()) {
                Ok(info) => info,
                Err(e) => {
                    debug!("Skipping {}: {}", child.raw(), e.last_error);
                    continue;
                }
            };

            if info.is_container {
                if let Some(found) = self.search(&child, depth + 1) {
                    return Some(found);
                }
            } else if info.is_downloadable_file() && self.is_accepted(&info.file_name) {
                return Some(ResolvedItem { handle: child, info });
            } else {
                trace!("Skipping {} ({})", info.file_name, child.raw());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::traits::codes;
    use crate::testdb::MockCamera;
    use std::time::Duration;

    fn resolver(mock: &Arc<MockCamera>) -> TransferResolver {
        let extensions: Vec<String> = ["jpg", "jpeg", "cr2", "cr3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        TransferResolver::new(
            mock.clone(),
            RetryPolicy::new(6, Duration::from_millis(1)),
            &extensions,
        )
    }

    #[test]
    fn test_file_resolves_to_itself() {
        let mock = Arc::new(MockCamera::new());
        let item = mock.add_file("IMG_0001.JPG", vec![7; 100]);

        let resolved = resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), item))
            .unwrap();

        assert_eq!(resolved.handle.raw(), item);
        assert_eq!(resolved.info.file_name, "IMG_0001.JPG");
        drop(resolved);
        assert_eq!(mock.release_count(item), 1);
    }

    #[test]
    fn test_not_ready_info_is_retried() {
        let mock = Arc::new(MockCamera::new());
        let item = mock.add_file("IMG_0001.JPG", vec![7; 100]);
        mock.info_not_ready(item, 3);

        assert!(resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), item))
            .is_some());
    }

    #[test]
    fn test_unreadable_info_releases_reference() {
        let mock = Arc::new(MockCamera::new());
        let item = mock.add_file("IMG_0001.JPG", vec![7; 100]);
        mock.info_not_ready(item, 100);

        assert!(resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), item))
            .is_none());
        assert_eq!(mock.release_count(item), 1);
        assert!(mock.violations().is_empty());
    }

    #[test]
    fn test_folder_resolves_first_image_and_releases_the_rest() {
        let mock = Arc::new(MockCamera::new());
        let folder = mock.add_folder("100CANON");
        let movie = mock.add_child_file(folder, "MVI_0001.MOV", vec![1; 50]);
        let empty = mock.add_child_file(folder, "IMG_0000.JPG", Vec::new());
        let image = mock.add_child_file(folder, "IMG_0001.CR3", vec![1; 50]);
        let later = mock.add_child_file(folder, "IMG_0002.JPG", vec![1; 50]);

        let resolved = resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), folder))
            .unwrap();

        assert_eq!(resolved.handle.raw(), image);
        assert_eq!(mock.release_count(folder), 1);
        assert_eq!(mock.release_count(movie), 1);
        assert_eq!(mock.release_count(empty), 1);
        assert_eq!(mock.outstanding(later), 0);
        drop(resolved);
        assert!(mock.leaked_items().is_empty());
        assert!(mock.violations().is_empty());
    }

    #[test]
    fn test_nested_folders_are_searched_depth_first() {
        let mock = Arc::new(MockCamera::new());
        let dcim = mock.add_folder("DCIM");
        let first = mock.add_child_folder(dcim, "100CANON");
        let _text = mock.add_child_file(first, "NOTES.TXT", vec![1; 5]);
        let second = mock.add_child_folder(dcim, "101CANON");
        let image = mock.add_child_file(second, "IMG_0101.JPG", vec![1; 5]);

        let resolved = resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), dcim))
            .unwrap();

        assert_eq!(resolved.handle.raw(), image);
        assert_eq!(mock.release_count(first), 1);
        assert_eq!(mock.release_count(second), 1);
        drop(resolved);
        assert!(mock.leaked_items().is_empty());
    }

    #[test]
    fn test_folder_without_images_resolves_to_nothing() {
        let mock = Arc::new(MockCamera::new());
        let folder = mock.add_folder("100CANON");
        mock.add_child_file(folder, "MVI_0001.MOV", vec![1; 50]);

        assert!(resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), folder))
            .is_none());
        assert!(mock.leaked_items().is_empty());
        assert!(mock.violations().is_empty());
    }

    #[test]
    fn test_zero_size_file_is_not_resolved() {
        let mock = Arc::new(MockCamera::new());
        let item = mock.add_file("IMG_0001.JPG", Vec::new());

        assert!(resolver(&mock)
            .resolve(DeviceHandle::adopt(mock.clone(), item))
            .is_none());
        assert_eq!(mock.release_count(item), 1);
    }

    #[test]
    fn test_deleted_item_fails_without_retry() {
        let mock = Arc::new(MockCamera::new());
        let item = mock.add_file("IMG_0001.JPG", vec![1; 5]);
        mock.delete_item(item).unwrap();

        let err = resolver(&mock).item_info(item).unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last_error.code(), codes::INTERNAL_ERROR);
    }
}
