/// Safe wrapper over [`NativeApi`].
///
/// Every native buffer is wrapped in a guard the moment it is received.
/// The guard's `Drop` issues the release call, so each buffer is released
/// exactly once, and a read can only happen through a live guard.
use super::{
    FsTreeFfi, InfoKind, NativeApi, ProgressFn, RawResult, RAW_EVENT_CONNECTED,
    RAW_EVENT_DISCONNECTED,
};
use crate::error::DeviceError;
use crate::model::{join_device_path, ConnectionEvent, DeviceState, FileKind, FsEntry};
use chrono::DateTime;
use compact_str::CompactString;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What kind of buffer a result's `ok` pointer carries, so a payload that
/// arrives next to an error can still be released with the right call.
#[derive(Clone, Copy)]
enum Payload {
    Handle,
    String,
    Tree,
}

/// Typed, release-safe access to the native device library.
#[derive(Clone)]
pub struct NativeAdapter {
    native: Arc<dyn NativeApi>,
}

impl std::fmt::Debug for NativeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAdapter").finish_non_exhaustive()
    }
}

impl NativeAdapter {
    pub fn new(native: Arc<dyn NativeApi>) -> Self {
        Self { native }
    }

    /// Acquire a connection to the attached device.
    pub fn acquire(&self) -> Result<ConnectionHandle, DeviceError> {
        let raw = self.native.acquire_connection();
        let ptr = self.take_result(raw, Payload::Handle, DeviceError::Acquisition)?;
        debug!("Acquired native connection handle");
        Ok(ConnectionHandle {
            native: Arc::clone(&self.native),
            ptr,
        })
    }

    pub fn start_event_source(&self) {
        self.native.start_event_source();
    }

    /// Pop at most one pending connection event.
    pub fn poll_event(&self) -> Option<ConnectionEvent> {
        let mut raw: c_int = -1;
        if !self.native.poll_event(&mut raw) {
            return None;
        }
        match raw {
            RAW_EVENT_CONNECTED => Some(ConnectionEvent::Connected),
            RAW_EVENT_DISCONNECTED => Some(ConnectionEvent::Disconnected),
            other => {
                warn!("Ignoring unknown native event code {other}");
                None
            }
        }
    }

    /// Fetch one metadata endpoint as a flat string mapping.
    pub fn device_info(
        &self,
        handle: &ConnectionHandle,
        kind: InfoKind,
    ) -> Result<DeviceState, DeviceError> {
        // SAFETY: `handle` is borrowed, so it has not been released.
        let raw = unsafe { self.native.get_info(kind, handle.as_ptr()) };
        let ok = self.take_result(raw, Payload::String, DeviceError::Io)?;
        // SAFETY: `ok` is a fresh string payload that nothing else owns.
        let payload = unsafe { NativeString::new(&*self.native, ok.cast()) };
        decode_info(payload)
    }

    /// List `path` and decode the returned tree down to `depth` levels
    /// below it. The native tree is released before this returns.
    ///
    /// `path` must already be normalised.
    pub fn list_directory(
        &self,
        handle: &ConnectionHandle,
        path: &str,
        depth: usize,
    ) -> Result<FsEntry, DeviceError> {
        let c_path = CString::new(path)
            .map_err(|_| DeviceError::decode(format!("path {path:?} contains a NUL byte")))?;
        // SAFETY: `c_path` outlives the call and `handle` is live.
        let raw = unsafe { self.native.list_directory(c_path.as_ptr(), handle.as_ptr()) };
        let ok = self.take_result(raw, Payload::Tree, DeviceError::Io)?;
        // SAFETY: `ok` is a fresh tree payload that nothing else owns.
        let tree = unsafe { NativeTree::new(&*self.native, ok.cast()) };
        // SAFETY: the guard keeps the whole tree alive for the traversal.
        let decoded = unsafe { decode_node(tree.as_ptr(), path.to_string(), depth) };
        drop(tree);
        decoded
    }

    /// Run a blocking download, forwarding native progress callbacks to
    /// `on_progress`.
    ///
    /// The callback is borrowed from the caller's frame for exactly the
    /// duration of the native call, which may invoke it from another thread.
    pub fn download(
        &self,
        handle: &ConnectionHandle,
        source: &str,
        destination: &Path,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<(), DeviceError> {
        let c_source = CString::new(source)
            .map_err(|_| DeviceError::decode(format!("path {source:?} contains a NUL byte")))?;
        let dest_str = destination.to_str().ok_or_else(|| {
            DeviceError::decode(format!("{} is not valid UTF-8", destination.display()))
        })?;
        let c_dest = CString::new(dest_str)
            .map_err(|_| DeviceError::decode(format!("path {dest_str:?} contains a NUL byte")))?;

        let mut sink: &mut (dyn FnMut(u8) + Send) = on_progress;
        let user_data = (&mut sink as *mut &mut (dyn FnMut(u8) + Send)).cast::<c_void>();
        let trampoline: ProgressFn = forward_progress;

        // SAFETY: both strings and `sink` live on this frame until after the
        // native call returns; the native side never calls back after that.
        unsafe {
            self.native.download(
                c_source.as_ptr(),
                c_dest.as_ptr(),
                handle.as_ptr(),
                trampoline,
                user_data,
            );
        }
        Ok(())
    }

    /// Split a raw result into its payload or an owned error.
    ///
    /// Error strings are read and released here; callers never see them.
    fn take_result(
        &self,
        raw: RawResult,
        payload: Payload,
        on_err: fn(String) -> DeviceError,
    ) -> Result<NonNull<c_void>, DeviceError> {
        match (NonNull::new(raw.ok), NonNull::new(raw.err)) {
            (Some(ok), None) => Ok(ok),
            (None, Some(err)) => Err(self.read_error(err, on_err)),
            (Some(ok), Some(err)) => {
                warn!("Native result carried both a payload and an error; releasing both");
                // SAFETY: `ok` is a fresh payload of the given kind.
                unsafe { self.release_payload(payload, ok) };
                let message = self.read_error(err, on_err);
                Err(DeviceError::decode(format!(
                    "result carried both a payload and an error ({message})"
                )))
            }
            (None, None) => Err(DeviceError::decode(
                "result carried neither a payload nor an error",
            )),
        }
    }

    fn read_error(&self, err: NonNull<c_char>, on_err: fn(String) -> DeviceError) -> DeviceError {
        // SAFETY: `err` is a fresh error string that nothing else owns.
        let guard = unsafe { NativeString::new(&*self.native, err) };
        match guard.read() {
            Ok(message) => on_err(message),
            Err(e) => e,
        }
    }

    /// # Safety
    /// `ptr` is an unreleased payload of kind `payload`.
    unsafe fn release_payload(&self, payload: Payload, ptr: NonNull<c_void>) {
        match payload {
            Payload::Handle => self.native.release_connection(ptr.as_ptr()),
            Payload::String => self.native.release_string(ptr.as_ptr().cast()),
            Payload::Tree => self.native.release_tree(ptr.as_ptr().cast()),
        }
    }
}

/// An acquired device connection. Released exactly once, on drop.
pub struct ConnectionHandle {
    native: Arc<dyn NativeApi>,
    ptr: NonNull<c_void>,
}

// SAFETY: the handle is an opaque token. `NativeApi` is `Send + Sync` and
// accepts handles from any thread; the pointer is never dereferenced here.
unsafe impl Send for ConnectionHandle {}
unsafe impl Sync for ConnectionHandle {}

impl ConnectionHandle {
    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        debug!("Releasing native connection handle");
        // SAFETY: the handle came from `acquire_connection` and `Drop` runs once.
        unsafe { self.native.release_connection(self.ptr.as_ptr()) };
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionHandle").field(&self.ptr).finish()
    }
}

/// Owned native string, released on drop.
struct NativeString<'a> {
    native: &'a dyn NativeApi,
    ptr: NonNull<c_char>,
}

impl<'a> NativeString<'a> {
    /// # Safety
    /// `ptr` is an unreleased NUL-terminated string from `native`.
    unsafe fn new(native: &'a dyn NativeApi, ptr: NonNull<c_char>) -> Self {
        Self { native, ptr }
    }

    fn read(&self) -> Result<String, DeviceError> {
        // SAFETY: the guard is alive, so the buffer has not been released.
        unsafe { read_c_str(self.ptr.as_ptr(), "string payload") }
    }
}

impl Drop for NativeString<'_> {
    fn drop(&mut self) {
        // SAFETY: released exactly once, here.
        unsafe { self.native.release_string(self.ptr.as_ptr()) };
    }
}

/// Owned native tree, released on drop after traversal.
struct NativeTree<'a> {
    native: &'a dyn NativeApi,
    ptr: NonNull<FsTreeFfi>,
}

impl<'a> NativeTree<'a> {
    /// # Safety
    /// `ptr` is an unreleased tree from `native`.
    unsafe fn new(native: &'a dyn NativeApi, ptr: NonNull<FsTreeFfi>) -> Self {
        Self { native, ptr }
    }

    fn as_ptr(&self) -> *const FsTreeFfi {
        self.ptr.as_ptr()
    }
}

impl Drop for NativeTree<'_> {
    fn drop(&mut self) {
        // SAFETY: released exactly once, here.
        unsafe { self.native.release_tree(self.ptr.as_ptr()) };
    }
}

/// Progress trampoline handed to the native download call.
unsafe extern "C" fn forward_progress(user_data: *mut c_void, percent: u8) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: `user_data` points at the `sink` on `NativeAdapter::download`'s
    // frame, which outlives the native call.
    let sink = unsafe { &mut *user_data.cast::<&mut (dyn FnMut(u8) + Send)>() };
    if std::panic::catch_unwind(AssertUnwindSafe(|| sink(percent))).is_err() {
        error!("Download progress callback panicked at {percent}%");
    }
}

/// # Safety
/// `ptr` is null or a valid NUL-terminated string.
unsafe fn read_c_str(ptr: *const c_char, what: &str) -> Result<String, DeviceError> {
    if ptr.is_null() {
        return Err(DeviceError::decode(format!("null {what}")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_owned)
        .map_err(|e| DeviceError::decode(format!("{what} is not UTF-8: {e}")))
}

/// Decode one node and, while `depth > 0`, its children.
///
/// Children below the depth limit are left undecoded (`children: None`)
/// even if the native tree carries them.
///
/// # Safety
/// `node` is null or points into a live native tree.
unsafe fn decode_node(
    node: *const FsTreeFfi,
    path: String,
    depth: usize,
) -> Result<FsEntry, DeviceError> {
    let node = node
        .as_ref()
        .ok_or_else(|| DeviceError::decode(format!("null tree node for {path}")))?;

    let nlink = if node.info.nlink.is_null() {
        CompactString::default()
    } else {
        CompactString::from(read_c_str(node.info.nlink, "link count")?)
    };

    let children = if depth == 0 {
        None
    } else {
        Some(decode_children(node, &path, depth - 1)?)
    };

    Ok(FsEntry {
        size: node.info.size as u64,
        blocks: node.info.blocks as u64,
        nlink,
        created: DateTime::from_timestamp(node.info.creation, 0),
        modified: DateTime::from_timestamp(node.info.modified, 0),
        kind: FileKind::from_raw(node.info.file_type),
        children,
        path,
    })
}

/// # Safety
/// `node` belongs to a live native tree.
unsafe fn decode_children(
    node: &FsTreeFfi,
    parent: &str,
    depth: usize,
) -> Result<Vec<FsEntry>, DeviceError> {
    let count = node.children_count;
    if count == 0 {
        return Ok(Vec::new());
    }
    if node.children.is_null() {
        return Err(DeviceError::decode(format!(
            "{parent} reports {count} children behind a null array"
        )));
    }

    let child_ptrs = std::slice::from_raw_parts(node.children, count);
    let mut children = Vec::with_capacity(count);
    for &child in child_ptrs {
        let child_ref = child
            .as_ref()
            .ok_or_else(|| DeviceError::decode(format!("null child pointer under {parent}")))?;
        let name = read_c_str(child_ref.path, "entry name")?;
        children.push(decode_node(child, join_device_path(parent, &name), depth)?);
    }
    Ok(children)
}

/// Read a JSON metadata payload, then release it.
fn decode_info(payload: NativeString<'_>) -> Result<DeviceState, DeviceError> {
    let json = payload.read();
    drop(payload);
    parse_info_json(&json?)
}

/// Parse a metadata JSON object into a flat string mapping.
///
/// Nested objects are merged into the top level; values that are neither
/// strings nor objects are skipped.
pub fn parse_info_json(json: &str) -> Result<DeviceState, DeviceError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| DeviceError::decode(format!("invalid metadata JSON: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(DeviceError::decode("metadata JSON is not an object"));
    };
    let mut flat = HashMap::new();
    flatten_into(map, &mut flat);
    Ok(DeviceState::from(flat))
}

fn flatten_into(
    map: serde_json::Map<String, serde_json::Value>,
    out: &mut HashMap<String, String>,
) {
    for (key, value) in map {
        match value {
            serde_json::Value::String(s) => {
                out.insert(key, s);
            }
            serde_json::Value::Object(inner) => flatten_into(inner, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_object_decodes_to_mapping() {
        let state =
            parse_info_json(r#"{"ProductType":"iPhone14,5","DeviceName":"Phone"}"#).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("ProductType"), Some("iPhone14,5"));
    }

    #[test]
    fn nested_objects_are_merged_and_non_strings_skipped() {
        let state =
            parse_info_json(r#"{"a":"1","n":{"b":"2","deep":{"c":"3"}},"count":4,"ok":true}"#)
                .unwrap();
        assert_eq!(state.get("a"), Some("1"));
        assert_eq!(state.get("b"), Some("2"));
        assert_eq!(state.get("c"), Some("3"));
        assert_eq!(state.get("count"), None);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(parse_info_json("{nope"), Err(DeviceError::Decode(_))));
        assert!(matches!(parse_info_json("[1,2]"), Err(DeviceError::Decode(_))));
    }
}
