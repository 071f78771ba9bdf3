/// In-process stand-in for the vendor device library.
///
/// Hands out real heap buffers through the same C-shaped surface and
/// tracks every one of them: which are live, how many were released, and
/// whether anything was released twice. Released buffers are poisoned and
/// parked until the fake itself is dropped, so a read after release shows
/// up as garbage instead of a crash.
///
/// Used by the test suites and by the binary's `--demo` mode.
use super::{
    FsTreeFfi, InfoKind, NativeApi, PathInfoFfi, ProgressFn, RawResult, RAW_EVENT_CONNECTED,
    RAW_EVENT_DISCONNECTED,
};
use crate::model::{normalize_device_path, ConnectionEvent, FileKind};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;
use tracing::{debug, warn};

/// Scripted directory tree served by `list_directory`.
#[derive(Clone, Debug)]
pub struct FakeTree {
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified: i64,
    pub children: Vec<FakeTree>,
}

impl FakeTree {
    pub fn dir(name: impl Into<String>, children: Vec<FakeTree>) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::Directory,
            size: 0,
            modified: 0,
            children,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: FileKind::File,
            size,
            modified: 0,
            children: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn modified_at(mut self, secs: i64) -> Self {
        self.modified = secs;
        self
    }
}

/// Scripted download: the percentages reported and the bytes written.
#[derive(Clone, Debug, Default)]
pub struct FakeDownload {
    pub progress: Vec<u8>,
    pub contents: Vec<u8>,
}

impl FakeDownload {
    pub fn new(progress: impl Into<Vec<u8>>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            progress: progress.into(),
            contents: contents.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Allocation {
    Handle,
    String,
    Tree,
}

enum InfoScript {
    Json(String),
    Fail(String),
    /// Both `ok` and `err` set.
    Malformed,
    /// Neither `ok` nor `err` set.
    Empty,
    /// A payload string that is not UTF-8.
    InvalidUtf8,
}

enum ListingScript {
    Tree(FakeTree),
    Fail(String),
    /// Non-zero `children_count` behind a null array.
    Broken,
    /// `tree` followed by a null slot in the root's child array.
    NullChild(FakeTree),
}

#[derive(Default)]
struct FakeState {
    acquire_error: Option<String>,
    events: VecDeque<c_int>,
    info: HashMap<InfoKind, InfoScript>,
    listings: HashMap<String, ListingScript>,
    downloads: HashMap<String, FakeDownload>,

    live: HashMap<usize, Allocation>,
    graveyard: Vec<(usize, Allocation)>,

    acquire_calls: usize,
    event_source_starts: usize,
    info_calls: usize,
    handles_released: usize,
    strings_released: usize,
    trees_released: usize,
    double_releases: usize,
    listed_paths: Vec<String>,
    downloads_started: Vec<(String, String)>,
}

/// Lifetime-tracking fake of the native device library.
#[derive(Default)]
pub struct FakeNative {
    state: Mutex<FakeState>,
    info_gate: Mutex<Option<Receiver<()>>>,
    download_gate: Mutex<Option<Receiver<()>>>,
}

impl FakeNative {
    /// A fake with an attached device, empty info and an empty root.
    pub fn new() -> Self {
        let fake = Self::default();
        fake.set_tree("/", FakeTree::dir("/", Vec::new()));
        fake
    }

    /// A fake pre-loaded with a plausible iPhone, used by `--demo`.
    pub fn demo() -> Self {
        let fake = Self::new();
        fake.set_info(
            InfoKind::Device,
            r#"{"DeviceName":"Demo iPhone","ProductType":"iPhone14,5","ProductVersion":"17.5.1","BuildVersion":"21F90","ModelNumber":"MLPF3","RegionInfo":"LL/A"}"#,
        );
        fake.set_info(
            InfoKind::Battery,
            r#"{"BatteryLevel":"87","BatteryHealth":"91.5","CycleCount":"412"}"#,
        );
        fake.set_info(
            InfoKind::Storage,
            r#"{"TotalDiskCapacity":"128","AmountDataAvailable":"41"}"#,
        );
        fake.set_info(InfoKind::Hardware, r#"{"Model":"iPhone14,5","Region":"United States"}"#);
        fake.set_info(InfoKind::Os, r#"{"ProductVersion":"17.5.1","BuildVersion":"21F90"}"#);
        fake.set_tree(
            "/",
            FakeTree::dir(
                "/",
                vec![
                    FakeTree::dir("DCIM", Vec::new()),
                    FakeTree::dir("Books", Vec::new()),
                    FakeTree::file("com.apple.itunes.lock_sync", 0),
                ],
            ),
        );
        fake.set_tree(
            "/DCIM",
            FakeTree::dir("DCIM", vec![FakeTree::dir("100APPLE", Vec::new())]),
        );
        fake.set_tree(
            "/DCIM/100APPLE",
            FakeTree::dir(
                "100APPLE",
                vec![
                    FakeTree::file("IMG_0001.JPG", 2_481_152).modified_at(1_714_000_000),
                    FakeTree::file("IMG_0002.MOV", 48_211_968).modified_at(1_714_000_600),
                ],
            ),
        );
        fake.set_download(
            "/DCIM/100APPLE/IMG_0001.JPG",
            FakeDownload::new(vec![0, 12, 37, 64, 88, 100], vec![0xFF, 0xD8, 0xFF, 0xE0]),
        );
        fake.push_event(ConnectionEvent::Connected);
        fake
    }

    // ── Scripting ────────────────────────────────────────────────────────

    pub fn fail_acquire(&self, message: impl Into<String>) {
        self.state.lock().acquire_error = Some(message.into());
    }

    pub fn allow_acquire(&self) {
        self.state.lock().acquire_error = None;
    }

    pub fn push_event(&self, event: ConnectionEvent) {
        let code = match event {
            ConnectionEvent::Connected => RAW_EVENT_CONNECTED,
            ConnectionEvent::Disconnected => RAW_EVENT_DISCONNECTED,
        };
        self.push_raw_event(code);
    }

    pub fn push_raw_event(&self, code: c_int) {
        self.state.lock().events.push_back(code);
    }

    pub fn set_info(&self, kind: InfoKind, json: impl Into<String>) {
        self.state
            .lock()
            .info
            .insert(kind, InfoScript::Json(json.into()));
    }

    pub fn fail_info(&self, kind: InfoKind, message: impl Into<String>) {
        self.state
            .lock()
            .info
            .insert(kind, InfoScript::Fail(message.into()));
    }

    pub fn set_malformed_info(&self, kind: InfoKind) {
        self.state.lock().info.insert(kind, InfoScript::Malformed);
    }

    /// Return a result with neither a payload nor an error.
    pub fn set_empty_info(&self, kind: InfoKind) {
        self.state.lock().info.insert(kind, InfoScript::Empty);
    }

    pub fn set_non_utf8_info(&self, kind: InfoKind) {
        self.state.lock().info.insert(kind, InfoScript::InvalidUtf8);
    }

    /// Serve `tree` when `path` is listed. `tree.name` is ignored for the
    /// root node; the listed path is used instead.
    pub fn set_tree(&self, path: &str, tree: FakeTree) {
        self.state
            .lock()
            .listings
            .insert(normalize_device_path(path), ListingScript::Tree(tree));
    }

    pub fn fail_listing(&self, path: &str, message: impl Into<String>) {
        self.state
            .lock()
            .listings
            .insert(normalize_device_path(path), ListingScript::Fail(message.into()));
    }

    pub fn set_broken_listing(&self, path: &str) {
        self.state
            .lock()
            .listings
            .insert(normalize_device_path(path), ListingScript::Broken);
    }

    /// Serve `tree` with an extra null pointer appended to its children.
    pub fn set_null_child_listing(&self, path: &str, tree: FakeTree) {
        self.state
            .lock()
            .listings
            .insert(normalize_device_path(path), ListingScript::NullChild(tree));
    }

    pub fn set_download(&self, source: &str, download: FakeDownload) {
        self.state
            .lock()
            .downloads
            .insert(normalize_device_path(source), download);
    }

    /// Block every `get_info` call until a `()` is sent (one call per
    /// message) or the returned sender is dropped (all calls).
    pub fn hold_info(&self) -> Sender<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        *self.info_gate.lock() = Some(rx);
        tx
    }

    /// Same as [`hold_info`](Self::hold_info) for downloads.
    pub fn hold_downloads(&self) -> Sender<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        *self.download_gate.lock() = Some(rx);
        tx
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn acquire_calls(&self) -> usize {
        self.state.lock().acquire_calls
    }

    pub fn event_source_starts(&self) -> usize {
        self.state.lock().event_source_starts
    }

    pub fn info_calls(&self) -> usize {
        self.state.lock().info_calls
    }

    pub fn handles_released(&self) -> usize {
        self.state.lock().handles_released
    }

    pub fn strings_released(&self) -> usize {
        self.state.lock().strings_released
    }

    pub fn trees_released(&self) -> usize {
        self.state.lock().trees_released
    }

    pub fn double_releases(&self) -> usize {
        self.state.lock().double_releases
    }

    /// Live buffers of any kind (handles included).
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn live_handles(&self) -> usize {
        self.count_live(Allocation::Handle)
    }

    /// Live strings and trees, i.e. payloads somebody still owes a release.
    pub fn live_buffers(&self) -> usize {
        self.count_live(Allocation::String) + self.count_live(Allocation::Tree)
    }

    fn count_live(&self, kind: Allocation) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    /// Every path passed to `list_directory`, verbatim, in call order.
    pub fn listed_paths(&self) -> Vec<String> {
        self.state.lock().listed_paths.clone()
    }

    /// `(source, destination)` of every download call, in call order.
    pub fn downloads_started(&self) -> Vec<(String, String)> {
        self.state.lock().downloads_started.clone()
    }

    // ── Allocation tracking ──────────────────────────────────────────────

    fn alloc_string(&self, text: &str) -> *mut c_char {
        self.alloc_bytes(text.replace('\0', " ").into_bytes())
    }

    fn alloc_bytes(&self, bytes: Vec<u8>) -> *mut c_char {
        let ptr = CString::new(bytes).unwrap_or_default().into_raw();
        self.state.lock().live.insert(ptr as usize, Allocation::String);
        ptr
    }

    /// Move a released pointer to the graveyard. Returns `false` for a
    /// pointer that was not live (double release or foreign pointer).
    fn retire(&self, ptr: usize, kind: Allocation) -> bool {
        let mut state = self.state.lock();
        match state.live.remove(&ptr) {
            Some(live_kind) if live_kind == kind => {
                state.graveyard.push((ptr, kind));
                match kind {
                    Allocation::Handle => state.handles_released += 1,
                    Allocation::String => state.strings_released += 1,
                    Allocation::Tree => state.trees_released += 1,
                }
                true
            }
            Some(live_kind) => {
                // Wrong release function: keep it live so the leak shows.
                state.live.insert(ptr, live_kind);
                state.double_releases += 1;
                warn!("Fake native: {kind:?} release called on a live {live_kind:?}");
                false
            }
            None => {
                state.double_releases += 1;
                warn!("Fake native: {kind:?} released twice or never allocated");
                false
            }
        }
    }

    fn wait_on(gate: &Mutex<Option<Receiver<()>>>) {
        let rx = gate.lock().clone();
        if let Some(rx) = rx {
            // A dropped sender opens the gate for good.
            let _ = rx.recv();
        }
    }
}

fn alloc_tree(tree: &FakeTree, path: &str) -> *mut FsTreeFfi {
    alloc_tree_with(tree, path, false)
}

fn alloc_tree_with(tree: &FakeTree, path: &str, null_child: bool) -> *mut FsTreeFfi {
    let mut children: Vec<*mut FsTreeFfi> = tree
        .children
        .iter()
        .map(|child| alloc_tree(child, &child.name))
        .collect();
    if null_child {
        children.push(ptr::null_mut());
    }
    let children_count = children.len();
    let children_ptr = if children.is_empty() {
        ptr::null_mut()
    } else {
        Box::into_raw(children.into_boxed_slice()) as *mut *mut FsTreeFfi
    };

    Box::into_raw(Box::new(FsTreeFfi {
        path: raw_c_string(path),
        info: PathInfoFfi {
            size: tree.size as usize,
            blocks: tree.size.div_ceil(512) as usize,
            nlink: raw_c_string(if tree.kind == FileKind::Directory { "2" } else { "1" }),
            creation: tree.modified,
            modified: tree.modified,
            file_type: tree.kind.to_raw(),
        },
        children: children_ptr,
        children_count,
    }))
}

fn raw_c_string(text: &str) -> *mut c_char {
    CString::new(text.replace('\0', " "))
        .unwrap_or_default()
        .into_raw()
}

/// # Safety
/// `ptr` came from `alloc_tree` (or is the broken-listing node) and is
/// freed once.
unsafe fn free_tree(ptr: *mut FsTreeFfi) {
    if ptr.is_null() {
        return;
    }
    let node = Box::from_raw(ptr);
    if !node.children.is_null() {
        let children = Box::from_raw(ptr::slice_from_raw_parts_mut(
            node.children,
            node.children_count,
        ));
        for &child in children.iter() {
            free_tree(child);
        }
    }
    if !node.path.is_null() {
        drop(CString::from_raw(node.path));
    }
    if !node.info.nlink.is_null() {
        drop(CString::from_raw(node.info.nlink));
    }
}

/// Overwrite a released string so a late read is visibly wrong.
///
/// # Safety
/// `ptr` is a live string from `alloc_string`.
unsafe fn poison_string(ptr: *mut c_char) {
    let len = CStr::from_ptr(ptr).to_bytes().len();
    ptr::write_bytes(ptr, b'#', len);
}

impl NativeApi for FakeNative {
    fn acquire_connection(&self) -> RawResult {
        let error = {
            let mut state = self.state.lock();
            state.acquire_calls += 1;
            state.acquire_error.clone()
        };
        if let Some(message) = error {
            return RawResult::err(self.alloc_string(&message));
        }
        let handle = Box::into_raw(Box::new(0xD1CE_u64));
        self.state
            .lock()
            .live
            .insert(handle as usize, Allocation::Handle);
        debug!("Fake native: acquired handle {handle:p}");
        RawResult::ok(handle.cast())
    }

    unsafe fn release_connection(&self, handle: *mut c_void) {
        self.retire(handle as usize, Allocation::Handle);
    }

    fn start_event_source(&self) {
        self.state.lock().event_source_starts += 1;
    }

    fn poll_event(&self, out_event: &mut c_int) -> bool {
        match self.state.lock().events.pop_front() {
            Some(code) => {
                *out_event = code;
                true
            }
            None => false,
        }
    }

    unsafe fn get_info(&self, kind: InfoKind, _handle: *mut c_void) -> RawResult {
        Self::wait_on(&self.info_gate);
        let script = {
            let mut state = self.state.lock();
            state.info_calls += 1;
            match state.info.get(&kind) {
                Some(InfoScript::Json(json)) => InfoScript::Json(json.clone()),
                Some(InfoScript::Fail(message)) => InfoScript::Fail(message.clone()),
                Some(InfoScript::Malformed) => InfoScript::Malformed,
                Some(InfoScript::Empty) => InfoScript::Empty,
                Some(InfoScript::InvalidUtf8) => InfoScript::InvalidUtf8,
                None => InfoScript::Json("{}".to_string()),
            }
        };
        match script {
            InfoScript::Json(json) => RawResult::ok(self.alloc_string(&json).cast()),
            InfoScript::Fail(message) => RawResult::err(self.alloc_string(&message)),
            InfoScript::Malformed => RawResult {
                ok: self.alloc_string("{}").cast(),
                err: self.alloc_string("both set"),
            },
            InfoScript::Empty => RawResult {
                ok: ptr::null_mut(),
                err: ptr::null_mut(),
            },
            InfoScript::InvalidUtf8 => {
                RawResult::ok(self.alloc_bytes(vec![b'{', 0xFF, 0xFE, b'}']).cast())
            }
        }
    }

    unsafe fn list_directory(&self, path: *const c_char, _handle: *mut c_void) -> RawResult {
        let path = CStr::from_ptr(path).to_string_lossy().into_owned();
        let tree = {
            let mut state = self.state.lock();
            state.listed_paths.push(path.clone());
            match state.listings.get(&path) {
                Some(ListingScript::Tree(tree)) => Ok(Some((tree.clone(), false))),
                Some(ListingScript::NullChild(tree)) => Ok(Some((tree.clone(), true))),
                Some(ListingScript::Fail(message)) => Err(message.clone()),
                Some(ListingScript::Broken) => Ok(None),
                None => Err(format!("No such file or directory: {path}")),
            }
        };
        let ptr = match tree {
            Ok(Some((tree, null_child))) => alloc_tree_with(&tree, &path, null_child),
            Ok(None) => Box::into_raw(Box::new(FsTreeFfi {
                path: raw_c_string(&path),
                info: PathInfoFfi {
                    size: 0,
                    blocks: 0,
                    nlink: ptr::null_mut(),
                    creation: 0,
                    modified: 0,
                    file_type: FileKind::Directory.to_raw(),
                },
                children: ptr::null_mut(),
                children_count: 2,
            })),
            Err(message) => return RawResult::err(self.alloc_string(&message)),
        };
        self.state.lock().live.insert(ptr as usize, Allocation::Tree);
        RawResult::ok(ptr.cast())
    }

    unsafe fn release_tree(&self, tree: *mut FsTreeFfi) {
        if self.retire(tree as usize, Allocation::Tree) {
            (*tree).info.file_type = -1;
            (*tree).info.size = usize::MAX;
        }
    }

    unsafe fn download(
        &self,
        src: *const c_char,
        dst: *const c_char,
        _handle: *mut c_void,
        on_progress: ProgressFn,
        user_data: *mut c_void,
    ) {
        let source = CStr::from_ptr(src).to_string_lossy().into_owned();
        let dest = CStr::from_ptr(dst).to_string_lossy().into_owned();
        let script = {
            let mut state = self.state.lock();
            state.downloads_started.push((source.clone(), dest.clone()));
            state.downloads.get(&source).cloned()
        };
        Self::wait_on(&self.download_gate);

        let Some(script) = script else {
            warn!("Fake native: no download scripted for {source}");
            return;
        };
        if let Err(e) = std::fs::write(&dest, &script.contents) {
            warn!("Fake native: could not write {dest}: {e}");
            return;
        }
        for percent in script.progress {
            on_progress(user_data, percent);
        }
    }

    unsafe fn release_string(&self, s: *mut c_char) {
        if self.retire(s as usize, Allocation::String) {
            poison_string(s);
        }
    }
}

impl Drop for FakeNative {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let owned = state.live.drain().chain(state.graveyard.drain(..));
        for (ptr, kind) in owned.collect::<Vec<_>>() {
            // SAFETY: every tracked pointer was allocated by this fake and
            // appears exactly once across `live` and `graveyard`.
            unsafe {
                match kind {
                    Allocation::Handle => drop(Box::from_raw(ptr as *mut u64)),
                    Allocation::String => drop(CString::from_raw(ptr as *mut c_char)),
                    Allocation::Tree => free_tree(ptr as *mut FsTreeFfi),
                }
            }
        }
    }
}
