//! Mock camera driver for testing without a real camera
//!
//! [`MockCamera`] implements [`CameraDriver`] over an in-memory card. It keeps
//! books on every reference it hands out so tests can assert that nothing is
//! leaked, released twice, or released after the driver retired it, and it
//! can be scripted to fail the way real bodies do (busy, not ready, missing
//! streams, no pointer access).

use crate::device::events::object_codes;
use crate::device::traits::{
    codes, props, Capacity, CameraDriver, CreateDisposition, DriverError, DriverResult, ItemInfo,
    ObjectEventHandler, RawEvent, RawRef, StateEventHandler,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Called with the item reference right before the mock deletes it
pub type DeleteHook = Arc<dyn Fn(RawRef) + Send + Sync>;

/// Configuration for mock camera behavior
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    /// Reported product name
    pub model_name: String,
    /// Number of cameras on the bus (0 simulates an unplugged camera)
    pub camera_count: u32,
    /// Fail `initialize` with this code
    pub initialize_error: Option<u32>,
    /// Fail `open_session` with this code
    pub open_session_error: Option<u32>,
    /// Value `SAVE_TO` reads back as, regardless of what was written
    pub save_to_readback: Option<u32>,
    /// In-memory stream creation fails
    pub fail_memory_stream: bool,
    /// Disk-backed stream creation fails for these dispositions
    pub fail_file_stream: Vec<CreateDisposition>,
    /// Direct pointer access to memory streams is not supported
    pub pointer_unsupported: bool,
    /// `dispatch_events` fails with this code
    pub dispatch_error: Option<u32>,
    /// Memory stream transfers deliver this many bytes fewer than the item holds
    pub short_memory_transfer: u64,
    /// Percentage (0-100) of transfers that report busy once
    pub random_busy_rate: u8,
    /// Delay added to every transfer
    pub transfer_delay: Duration,
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            model_name: "Canon EOS R6 Mark II".to_string(),
            camera_count: 1,
            initialize_error: None,
            open_session_error: None,
            save_to_readback: None,
            fail_memory_stream: false,
            fail_file_stream: Vec::new(),
            pointer_unsupported: false,
            dispatch_error: None,
            short_memory_transfer: 0,
            random_busy_rate: 0,
            transfer_delay: Duration::ZERO,
        }
    }
}

/// A file or folder on the simulated card
#[derive(Debug, Clone)]
struct MockItem {
    info: ItemInfo,
    content: Vec<u8>,
    children: Vec<RawRef>,
}

#[derive(Debug)]
enum MockStream {
    Memory { buffer: Vec<u8>, position: usize },
    File { path: PathBuf },
}

enum Pending {
    Object(RawEvent),
    State(u32, u32),
}

#[derive(Default)]
struct MockState {
    config: MockCameraConfig,
    next_ref: u64,

    items: HashMap<RawRef, MockItem>,
    streams: HashMap<RawRef, MockStream>,
    list_ref: Option<RawRef>,
    camera_ref: Option<RawRef>,

    // Reference bookkeeping
    outstanding: HashMap<RawRef, i64>,
    release_counts: HashMap<RawRef, u32>,
    deleted: HashSet<RawRef>,
    violations: Vec<String>,

    // Driver state
    initialized: bool,
    session_open: bool,
    terminate_count: u32,
    close_session_count: u32,
    properties: HashMap<u32, u32>,
    commands: Vec<(u32, i32)>,
    capacity: Option<Capacity>,
    object_handler: Option<ObjectEventHandler>,
    state_handler: Option<StateEventHandler>,
    pending: VecDeque<Pending>,
    dispatch_count: u32,

    // Scripted failures
    download_failures: HashMap<RawRef, (u32, u32)>,
    info_not_ready: HashMap<RawRef, u32>,
    delete_failures: HashMap<RawRef, u32>,
    on_delete: Option<DeleteHook>,

    // Call accounting
    download_calls: HashMap<RawRef, u32>,
    memory_streams_created: u32,
    file_streams_created: Vec<CreateDisposition>,
    memory_downloads: u32,
    file_downloads: u32,
    completed: Vec<RawRef>,
    cancelled: Vec<RawRef>,
}

impl MockState {
    fn allocate(&mut self) -> RawRef {
        self.next_ref += 1;
        RawRef(0x1000 + self.next_ref)
    }

    fn hand_out(&mut self, raw: RawRef) -> RawRef {
        *self.outstanding.entry(raw).or_insert(0) += 1;
        raw
    }
}

/// Simulated camera implementing [`CameraDriver`]
pub struct MockCamera {
    state: Mutex<MockState>,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCamera {
    /// Create a camera with one body attached and an empty card
    pub fn new() -> Self {
        Self::with_config(MockCameraConfig::default())
    }

    /// Create with specific configuration
    pub fn with_config(config: MockCameraConfig) -> Self {
        Self {
            state: Mutex::new(MockState {
                config,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the configuration in place
    pub fn configure(&self, f: impl FnOnce(&mut MockCameraConfig)) {
        f(&mut self.lock().config);
    }

    // ------------------------------------------------------------------------
    // Card contents
    // ------------------------------------------------------------------------

    /// Put a file on the card; the returned reference is owned by whoever
    /// receives it in an event
    pub fn add_file(&self, name: &str, content: Vec<u8>) -> RawRef {
        let mut state = self.lock();
        let raw = state.allocate();
        let mut info = ItemInfo::file(name, content.len() as u64);
        info.capture_timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        state.items.insert(
            raw,
            MockItem {
                info,
                content,
                children: Vec::new(),
            },
        );
        state.hand_out(raw)
    }

    /// Put a file on the card whose reported size differs from its content
    pub fn add_file_with_size(&self, name: &str, content: Vec<u8>, reported_size: u64) -> RawRef {
        let raw = self.add_file(name, content);
        if let Some(item) = self.lock().items.get_mut(&raw) {
            item.info.size = reported_size;
        }
        raw
    }

    /// Put a folder on the card
    pub fn add_folder(&self, name: &str) -> RawRef {
        let mut state = self.lock();
        let raw = state.allocate();
        state.items.insert(
            raw,
            MockItem {
                info: ItemInfo::container(name),
                content: Vec::new(),
                children: Vec::new(),
            },
        );
        state.hand_out(raw)
    }

    /// Add a child under a folder. The child is only handed out through
    /// `child_at`.
    pub fn add_child_file(&self, parent: RawRef, name: &str, content: Vec<u8>) -> RawRef {
        let mut state = self.lock();
        let raw = state.allocate();
        state.items.insert(
            raw,
            MockItem {
                info: ItemInfo::file(name, content.len() as u64),
                content,
                children: Vec::new(),
            },
        );
        if let Some(folder) = state.items.get_mut(&parent) {
            folder.children.push(raw);
        }
        raw
    }

    /// Add a nested folder under a folder
    pub fn add_child_folder(&self, parent: RawRef, name: &str) -> RawRef {
        let mut state = self.lock();
        let raw = state.allocate();
        state.items.insert(
            raw,
            MockItem {
                info: ItemInfo::container(name),
                content: Vec::new(),
                children: Vec::new(),
            },
        );
        if let Some(folder) = state.items.get_mut(&parent) {
            folder.children.push(raw);
        }
        raw
    }

    /// Simulate a shutter release: add the file and queue the "item created" event
    pub fn capture(&self, name: &str, content: Vec<u8>) -> RawRef {
        let raw = self.add_file(name, content);
        self.queue_object_event(object_codes::DIR_ITEM_CREATED, raw);
        raw
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Queue an object event for the next `dispatch_events`
    pub fn queue_object_event(&self, code: u32, raw: RawRef) {
        self.lock().pending.push_back(Pending::Object(RawEvent {
            code,
            native_ref: Some(raw),
            context: 0,
        }));
    }

    /// Queue a state event for the next `dispatch_events`
    pub fn queue_state_event(&self, code: u32, param: u32) {
        self.lock().pending.push_back(Pending::State(code, param));
    }

    /// Deliver an object event right now on the calling thread, the way a
    /// driver-owned callback thread would
    pub fn fire_object_event(&self, code: u32, native_ref: Option<RawRef>) -> bool {
        let handler = self.lock().object_handler.clone();
        match handler {
            Some(handler) => {
                handler(RawEvent {
                    code,
                    native_ref,
                    context: 0,
                });
                true
            }
            None => false,
        }
    }

    /// Deliver a state event right now on the calling thread
    pub fn fire_state_event(&self, code: u32, param: u32) -> bool {
        let handler = self.lock().state_handler.clone();
        match handler {
            Some(handler) => {
                handler(code, param);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Scripted failures
    // ------------------------------------------------------------------------

    /// The next `times` transfers of `item` fail with `code`
    pub fn fail_downloads(&self, item: RawRef, times: u32, code: u32) {
        self.lock().download_failures.insert(item, (times, code));
    }

    /// The next `times` info queries for `item` report "not ready"
    pub fn info_not_ready(&self, item: RawRef, times: u32) {
        self.lock().info_not_ready.insert(item, times);
    }

    /// Deleting `item` fails with `code`
    pub fn fail_delete(&self, item: RawRef, code: u32) {
        self.lock().delete_failures.insert(item, code);
    }

    /// Run `hook` right before any item is deleted
    pub fn on_delete(&self, hook: DeleteHook) {
        self.lock().on_delete = Some(hook);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub fn release_count(&self, raw: RawRef) -> u32 {
        self.lock().release_counts.get(&raw).copied().unwrap_or(0)
    }

    /// References handed out and not yet released or retired
    pub fn outstanding(&self, raw: RawRef) -> i64 {
        self.lock().outstanding.get(&raw).copied().unwrap_or(0)
    }

    /// Item references (files and folders) still held by the host
    pub fn leaked_items(&self) -> Vec<RawRef> {
        let state = self.lock();
        let mut leaked: Vec<RawRef> = state
            .outstanding
            .iter()
            .filter(|(raw, count)| **count > 0 && state.items.contains_key(raw))
            .map(|(raw, _)| *raw)
            .collect();
        leaked.sort();
        leaked
    }

    /// Streams created and not yet released
    pub fn open_streams(&self) -> usize {
        self.lock().streams.len()
    }

    /// Reference-discipline violations seen so far
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    pub fn is_deleted(&self, raw: RawRef) -> bool {
        self.lock().deleted.contains(&raw)
    }

    pub fn download_calls(&self, item: RawRef) -> u32 {
        self.lock().download_calls.get(&item).copied().unwrap_or(0)
    }

    pub fn total_download_calls(&self) -> u32 {
        self.lock().download_calls.values().sum()
    }

    /// Transfers into in-memory streams
    pub fn memory_downloads(&self) -> u32 {
        self.lock().memory_downloads
    }

    /// Transfers into disk-backed streams
    pub fn file_downloads(&self) -> u32 {
        self.lock().file_downloads
    }

    pub fn memory_streams_created(&self) -> u32 {
        self.lock().memory_streams_created
    }

    /// Dispositions of every successful disk-backed stream creation
    pub fn file_streams_created(&self) -> Vec<CreateDisposition> {
        self.lock().file_streams_created.clone()
    }

    pub fn completed(&self) -> Vec<RawRef> {
        self.lock().completed.clone()
    }

    pub fn cancelled(&self) -> Vec<RawRef> {
        self.lock().cancelled.clone()
    }

    pub fn commands(&self) -> Vec<(u32, i32)> {
        self.lock().commands.clone()
    }

    pub fn capacity(&self) -> Option<Capacity> {
        self.lock().capacity
    }

    pub fn property(&self, property: u32) -> Option<u32> {
        self.lock().properties.get(&property).copied()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn is_session_open(&self) -> bool {
        self.lock().session_open
    }

    pub fn terminate_count(&self) -> u32 {
        self.lock().terminate_count
    }

    pub fn close_session_count(&self) -> u32 {
        self.lock().close_session_count
    }

    pub fn has_object_handler(&self) -> bool {
        self.lock().object_handler.is_some()
    }

    pub fn has_state_handler(&self) -> bool {
        self.lock().state_handler.is_some()
    }

    pub fn dispatch_count(&self) -> u32 {
        self.lock().dispatch_count
    }

    /// The camera reference handed out by the last `child_at` on the camera list
    pub fn camera_ref(&self) -> Option<RawRef> {
        self.lock().camera_ref
    }

    /// The camera list reference handed out by the last `camera_list`
    pub fn list_ref(&self) -> Option<RawRef> {
        self.lock().list_ref
    }
}

fn fail<T>(code: u32) -> DriverResult<T> {
    Err(DriverError::new(code))
}

impl CameraDriver for MockCamera {
    fn initialize(&self) -> DriverResult<()> {
        let mut state = self.lock();
        if let Some(code) = state.config.initialize_error {
            return fail(code);
        }
        state.initialized = true;
        Ok(())
    }

    fn terminate(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.initialized = false;
        state.terminate_count += 1;
        Ok(())
    }

    fn camera_list(&self) -> DriverResult<RawRef> {
        let mut state = self.lock();
        if !state.initialized {
            return fail(codes::INTERNAL_ERROR);
        }
        let raw = state.allocate();
        state.list_ref = Some(raw);
        Ok(state.hand_out(raw))
    }

    fn child_count(&self, parent: RawRef) -> DriverResult<u32> {
        let state = self.lock();
        if state.list_ref == Some(parent) {
            return Ok(state.config.camera_count);
        }
        match state.items.get(&parent) {
            Some(item) => Ok(item.children.len() as u32),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn child_at(&self, parent: RawRef, index: u32) -> DriverResult<RawRef> {
        let mut state = self.lock();
        if state.list_ref == Some(parent) {
            if index >= state.config.camera_count {
                return fail(codes::DEVICE_NOT_FOUND);
            }
            let raw = state.allocate();
            state.camera_ref = Some(raw);
            return Ok(state.hand_out(raw));
        }
        let child = state
            .items
            .get(&parent)
            .and_then(|item| item.children.get(index as usize).copied());
        match child {
            Some(raw) => Ok(state.hand_out(raw)),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn open_session(&self, camera: RawRef) -> DriverResult<()> {
        let mut state = self.lock();
        if state.camera_ref != Some(camera) {
            return fail(codes::INTERNAL_ERROR);
        }
        if let Some(code) = state.config.open_session_error {
            return fail(code);
        }
        state.session_open = true;
        Ok(())
    }

    fn close_session(&self, _camera: RawRef) -> DriverResult<()> {
        let mut state = self.lock();
        state.session_open = false;
        state.close_session_count += 1;
        Ok(())
    }

    fn send_command(&self, _camera: RawRef, command: u32, param: i32) -> DriverResult<()> {
        let mut state = self.lock();
        if !state.session_open {
            return fail(codes::SESSION_NOT_OPEN);
        }
        state.commands.push((command, param));
        Ok(())
    }

    fn get_u32_property(&self, _object: RawRef, property: u32) -> DriverResult<u32> {
        let state = self.lock();
        if property == props::SAVE_TO {
            if let Some(value) = state.config.save_to_readback {
                return Ok(value);
            }
        }
        match state.properties.get(&property) {
            Some(value) => Ok(*value),
            None if property == props::SAVE_TO => Ok(props::SAVE_TO_CAMERA),
            None => fail(codes::NOT_SUPPORTED),
        }
    }

    fn set_u32_property(&self, _object: RawRef, property: u32, value: u32) -> DriverResult<()> {
        let mut state = self.lock();
        if !state.session_open {
            return fail(codes::SESSION_NOT_OPEN);
        }
        state.properties.insert(property, value);
        Ok(())
    }

    fn get_string_property(&self, _object: RawRef, property: u32) -> DriverResult<String> {
        let state = self.lock();
        if property == props::PRODUCT_NAME && !state.config.model_name.is_empty() {
            Ok(state.config.model_name.clone())
        } else {
            fail(codes::NOT_SUPPORTED)
        }
    }

    fn set_capacity(&self, _camera: RawRef, capacity: Capacity) -> DriverResult<()> {
        self.lock().capacity = Some(capacity);
        Ok(())
    }

    fn set_object_event_handler(
        &self,
        _camera: RawRef,
        handler: Option<ObjectEventHandler>,
    ) -> DriverResult<()> {
        self.lock().object_handler = handler;
        Ok(())
    }

    fn set_state_event_handler(
        &self,
        _camera: RawRef,
        handler: Option<StateEventHandler>,
    ) -> DriverResult<()> {
        self.lock().state_handler = handler;
        Ok(())
    }

    fn dispatch_events(&self) -> DriverResult<()> {
        let (pending, object_handler, state_handler) = {
            let mut state = self.lock();
            state.dispatch_count += 1;
            if let Some(code) = state.config.dispatch_error {
                return fail(code);
            }
            let pending: Vec<Pending> = state.pending.drain(..).collect();
            (
                pending,
                state.object_handler.clone(),
                state.state_handler.clone(),
            )
        };

        // Handlers may call back into the driver; the lock is not held here
        for event in pending {
            match event {
                Pending::Object(raw_event) => {
                    if let Some(handler) = &object_handler {
                        handler(raw_event);
                    }
                }
                Pending::State(code, param) => {
                    if let Some(handler) = &state_handler {
                        handler(code, param);
                    }
                }
            }
        }
        Ok(())
    }

    fn item_info(&self, item: RawRef) -> DriverResult<ItemInfo> {
        let mut state = self.lock();
        if state.deleted.contains(&item) {
            return fail(codes::INTERNAL_ERROR);
        }
        if let Some(remaining) = state.info_not_ready.get_mut(&item) {
            if *remaining > 0 {
                *remaining -= 1;
                return fail(codes::OBJECT_NOT_READY);
            }
        }
        match state.items.get(&item) {
            Some(found) => Ok(found.info.clone()),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn create_memory_stream(&self, capacity: u64) -> DriverResult<RawRef> {
        let mut state = self.lock();
        if state.config.fail_memory_stream {
            return fail(codes::MEM_ALLOC_FAILED);
        }
        state.memory_streams_created += 1;
        let raw = state.allocate();
        state.streams.insert(
            raw,
            MockStream::Memory {
                buffer: Vec::with_capacity(capacity.min(64 * 1024 * 1024) as usize),
                position: 0,
            },
        );
        Ok(state.hand_out(raw))
    }

    fn create_file_stream(
        &self,
        path: &Path,
        disposition: CreateDisposition,
    ) -> DriverResult<RawRef> {
        let mut state = self.lock();
        if state.config.fail_file_stream.contains(&disposition) {
            return fail(codes::FILE_IO_ERROR);
        }
        let mut options = OpenOptions::new();
        options.write(true);
        match disposition {
            CreateDisposition::CreateNew => options.create_new(true),
            CreateDisposition::CreateAlways => options.create(true).truncate(true),
        };
        if options.open(path).is_err() {
            return fail(codes::FILE_IO_ERROR);
        }
        state.file_streams_created.push(disposition);
        let raw = state.allocate();
        state.streams.insert(
            raw,
            MockStream::File {
                path: path.to_path_buf(),
            },
        );
        Ok(state.hand_out(raw))
    }

    fn download(&self, item: RawRef, size: u64, stream: RawRef) -> DriverResult<()> {
        let delay = {
            let mut state = self.lock();
            *state.download_calls.entry(item).or_insert(0) += 1;
            state.config.transfer_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some((remaining, code)) = state.download_failures.get_mut(&item) {
            if *remaining > 0 {
                *remaining -= 1;
                return fail(*code);
            }
        }
        if state.config.random_busy_rate > 0 {
            let roll = rand::random::<u8>() % 100;
            if roll < state.config.random_busy_rate {
                return fail(codes::DEVICE_BUSY);
            }
        }
        if state.deleted.contains(&item) {
            return fail(codes::INTERNAL_ERROR);
        }

        let content = match state.items.get(&item) {
            Some(found) if !found.info.is_container => found.content.clone(),
            _ => return fail(codes::INTERNAL_ERROR),
        };
        let take = if size > 0 {
            content.len().min(size as usize)
        } else {
            content.len()
        };
        let short = state.config.short_memory_transfer as usize;

        match state.streams.get_mut(&stream) {
            Some(MockStream::Memory { buffer, position }) => {
                let end = take.saturating_sub(short);
                buffer.clear();
                buffer.extend_from_slice(&content[..end]);
                *position = buffer.len();
                state.memory_downloads += 1;
                Ok(())
            }
            Some(MockStream::File { path }) => {
                if fs::write(path.as_path(), &content[..take]).is_err() {
                    return fail(codes::FILE_IO_ERROR);
                }
                state.file_downloads += 1;
                Ok(())
            }
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn download_complete(&self, item: RawRef) -> DriverResult<()> {
        self.lock().completed.push(item);
        Ok(())
    }

    fn download_cancel(&self, item: RawRef) -> DriverResult<()> {
        self.lock().cancelled.push(item);
        Ok(())
    }

    fn stream_pointer_copy(&self, stream: RawRef) -> DriverResult<Vec<u8>> {
        let state = self.lock();
        if state.config.pointer_unsupported {
            return fail(codes::NOT_SUPPORTED);
        }
        match state.streams.get(&stream) {
            Some(MockStream::Memory { buffer, .. }) => Ok(buffer.clone()),
            Some(MockStream::File { .. }) => fail(codes::NOT_SUPPORTED),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn stream_length(&self, stream: RawRef) -> DriverResult<u64> {
        let state = self.lock();
        match state.streams.get(&stream) {
            Some(MockStream::Memory { buffer, .. }) => Ok(buffer.len() as u64),
            Some(MockStream::File { path }) => fs::metadata(path)
                .map(|m| m.len())
                .map_err(|_| DriverError::new(codes::FILE_IO_ERROR)),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn stream_rewind(&self, stream: RawRef) -> DriverResult<()> {
        let mut state = self.lock();
        match state.streams.get_mut(&stream) {
            Some(MockStream::Memory { position, .. }) => {
                *position = 0;
                Ok(())
            }
            Some(MockStream::File { .. }) => Ok(()),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn stream_read(&self, stream: RawRef, len: u64) -> DriverResult<Vec<u8>> {
        let mut state = self.lock();
        match state.streams.get_mut(&stream) {
            Some(MockStream::Memory { buffer, position }) => {
                let start = (*position).min(buffer.len());
                let end = start.saturating_add(len as usize).min(buffer.len());
                *position = end;
                Ok(buffer[start..end].to_vec())
            }
            Some(MockStream::File { .. }) => fail(codes::NOT_SUPPORTED),
            None => fail(codes::INTERNAL_ERROR),
        }
    }

    fn delete_item(&self, item: RawRef) -> DriverResult<()> {
        let hook = {
            let mut state = self.lock();
            if let Some(code) = state.delete_failures.get(&item) {
                return fail(*code);
            }
            if state.deleted.contains(&item) {
                state
                    .violations
                    .push(format!("delete of already deleted {}", item));
                return fail(codes::INTERNAL_ERROR);
            }
            if !state.items.contains_key(&item) {
                return fail(codes::INTERNAL_ERROR);
            }
            state.on_delete.clone()
        };

        if let Some(hook) = hook {
            hook(item);
        }

        let mut state = self.lock();
        state.deleted.insert(item);
        let count = state.outstanding.entry(item).or_insert(0);
        *count -= 1;
        Ok(())
    }

    fn release(&self, object: RawRef) -> DriverResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        *state.release_counts.entry(object).or_insert(0) += 1;

        if state.deleted.contains(&object) {
            state
                .violations
                .push(format!("release of {} after the driver retired it", object));
            return fail(codes::INTERNAL_ERROR);
        }

        let count = state.outstanding.entry(object).or_insert(0);
        *count -= 1;
        if *count < 0 {
            state.violations.push(format!("double release of {}", object));
            return fail(codes::INTERNAL_ERROR);
        }

        state.streams.remove(&object);
        Ok(())
    }
}
