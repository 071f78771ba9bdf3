/// The native boundary: the C-shaped surface of the vendor device library.
///
/// [`NativeApi`] mirrors the library's exported functions one to one and
/// deals only in raw pointers. Nothing outside [`adapter`] calls it; the
/// adapter turns every raw result into owned Rust values and issues each
/// release call exactly once.
///
/// # Buffer ownership
///
/// Every non-null pointer the native side hands out (handles, strings,
/// trees) stays owned by the native side until the matching release call.
/// Tree buffers are released only after the whole traversal has finished.
pub mod adapter;
pub mod fake;
#[cfg(feature = "linked")]
pub mod linked;

pub use adapter::{ConnectionHandle, NativeAdapter};
pub use fake::{FakeDownload, FakeNative, FakeTree};
#[cfg(feature = "linked")]
pub use linked::LinkedNative;

use serde::Deserialize;
use std::ffi::{c_char, c_int, c_void};

/// Tagged success/error pair returned by every fallible native call.
///
/// A well-formed result has exactly one non-null pointer. `ok` is a
/// handle or a NUL-terminated string or a tree, depending on the call.
#[repr(C)]
#[derive(Debug)]
pub struct RawResult {
    pub ok: *mut c_void,
    pub err: *mut c_char,
}

impl RawResult {
    pub fn ok(ok: *mut c_void) -> Self {
        Self {
            ok,
            err: std::ptr::null_mut(),
        }
    }

    pub fn err(err: *mut c_char) -> Self {
        Self {
            ok: std::ptr::null_mut(),
            err,
        }
    }
}

/// Per-entry metadata inside a native tree node.
#[repr(C)]
#[derive(Debug)]
pub struct PathInfoFfi {
    pub size: usize,
    pub blocks: usize,
    pub nlink: *mut c_char,
    /// Seconds since the Unix epoch.
    pub creation: i64,
    pub modified: i64,
    /// Discriminant of the native file-type enum (0 = directory, 1 = file, ...).
    /// Kept as an integer so an unexpected value cannot be undefined behaviour.
    pub file_type: c_int,
}

/// One node of a native directory listing.
///
/// `children` points at `children_count` node pointers, or is null when
/// there are none.
#[repr(C)]
#[derive(Debug)]
pub struct FsTreeFfi {
    pub path: *mut c_char,
    pub info: PathInfoFfi,
    pub children: *mut *mut FsTreeFfi,
    pub children_count: usize,
}

/// Raw event codes written by `poll_event`.
pub const RAW_EVENT_CONNECTED: c_int = 0;
pub const RAW_EVENT_DISCONNECTED: c_int = 1;

/// Progress callback passed across the boundary.
///
/// `user_data` is handed back untouched on every call.
pub type ProgressFn = unsafe extern "C" fn(user_data: *mut c_void, percent: u8);

/// Which metadata endpoint to query.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoKind {
    Battery = 0,
    Storage,
    Hardware,
    Os,
    Device,
}

impl InfoKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Storage => "storage",
            Self::Hardware => "hardware",
            Self::Os => "os",
            Self::Device => "device",
        }
    }
}

/// The raw device-communication capability.
///
/// Implementations must be callable from any thread; the control context,
/// the event monitor and the worker pool all reach the same instance.
/// Methods that receive a pointer previously produced by the native side
/// are `unsafe`: the caller guarantees the pointer came from this
/// implementation and has not been released yet.
pub trait NativeApi: Send + Sync + 'static {
    /// Connect to the first attached device. `ok` is the opaque handle.
    fn acquire_connection(&self) -> RawResult;

    /// # Safety
    /// `handle` came from [`acquire_connection`](Self::acquire_connection)
    /// and is released at most once.
    unsafe fn release_connection(&self, handle: *mut c_void);

    /// Start the background connect/disconnect watcher.
    fn start_event_source(&self);

    /// Pop at most one buffered event into `out_event`. Returns `false` when
    /// nothing is pending.
    fn poll_event(&self, out_event: &mut c_int) -> bool;

    /// `ok` is a NUL-terminated JSON object of string values.
    ///
    /// # Safety
    /// `handle` is a live connection handle.
    unsafe fn get_info(&self, kind: InfoKind, handle: *mut c_void) -> RawResult;

    /// `ok` is a `*mut FsTreeFfi` for `path` and its direct children.
    ///
    /// # Safety
    /// `path` is a valid NUL-terminated string; `handle` is live.
    unsafe fn list_directory(&self, path: *const c_char, handle: *mut c_void) -> RawResult;

    /// # Safety
    /// `tree` came from [`list_directory`](Self::list_directory) and is
    /// released at most once.
    unsafe fn release_tree(&self, tree: *mut FsTreeFfi);

    /// Copy `src` on the device to the local file `dst`, blocking until the
    /// transfer ends. `on_progress` may be called any number of times, from
    /// any thread, but never after this function returns.
    ///
    /// # Safety
    /// Both paths are valid NUL-terminated strings, `handle` is live, and
    /// `user_data` stays valid for the whole call.
    unsafe fn download(
        &self,
        src: *const c_char,
        dst: *const c_char,
        handle: *mut c_void,
        on_progress: ProgressFn,
        user_data: *mut c_void,
    );

    /// # Safety
    /// `s` is a string produced by this implementation (a result's `ok` or
    /// `err`) and is released at most once.
    unsafe fn release_string(&self, s: *mut c_char);
}
