/// Binding to the real `idevice_lib` shared library.
///
/// The library's download callback carries no user data, so the active
/// progress target lives in a process-wide slot and downloads are
/// serialised behind a lock. Listing returns a bare tree pointer (null on
/// failure), which is wrapped into a result pair here.
use super::{FsTreeFfi, InfoKind, NativeApi, ProgressFn, RawResult};
use parking_lot::{const_mutex, Mutex};
use std::collections::HashSet;
use std::ffi::{c_char, c_int, c_void, CStr, CString};

#[link(name = "idevice_lib")]
extern "C" {
    fn get_provider() -> RawResult;
    fn free_provider(provider: *mut c_void);
    fn start_device_watcher();
    fn poll_event(out_event: *mut c_int) -> bool;
    fn get_device_info(provider: *mut c_void) -> RawResult;
    fn get_battery_info(provider: *mut c_void) -> RawResult;
    fn get_storage_info(provider: *mut c_void) -> RawResult;
    fn get_hardware_info(provider: *mut c_void) -> RawResult;
    fn get_os_info(provider: *mut c_void) -> RawResult;
    fn list_path_ffi(path: *const c_char, provider: *mut c_void) -> *mut FsTreeFfi;
    fn free_fstree(tree: *mut FsTreeFfi);
    fn download_a_file(
        path: *const c_char,
        dest: *const c_char,
        provider: *mut c_void,
        callback: extern "C" fn(u8),
    );
    fn free_c_string(s: *mut c_char);
}

struct ProgressSlot {
    callback: Option<ProgressFn>,
    user_data: usize,
}

static PROGRESS: Mutex<ProgressSlot> = const_mutex(ProgressSlot {
    callback: None,
    user_data: 0,
});
static DOWNLOAD_LOCK: Mutex<()> = const_mutex(());

extern "C" fn relay_progress(percent: u8) {
    let (callback, user_data) = {
        let slot = PROGRESS.lock();
        (slot.callback, slot.user_data)
    };
    if let Some(callback) = callback {
        // SAFETY: the slot is filled only for the duration of a
        // `download_a_file` call whose caller keeps `user_data` alive.
        unsafe { callback(user_data as *mut c_void, percent) };
    }
}

/// [`NativeApi`] backed by the linked vendor library.
#[derive(Default)]
pub struct LinkedNative {
    /// Error strings allocated on this side, freed with `CString`.
    owned_errors: Mutex<HashSet<usize>>,
}

impl LinkedNative {
    pub fn new() -> Self {
        Self::default()
    }

    fn owned_error(&self, message: &str) -> *mut c_char {
        let ptr = CString::new(message.replace('\0', " "))
            .unwrap_or_default()
            .into_raw();
        self.owned_errors.lock().insert(ptr as usize);
        ptr
    }
}

impl NativeApi for LinkedNative {
    fn acquire_connection(&self) -> RawResult {
        // SAFETY: no preconditions.
        unsafe { get_provider() }
    }

    unsafe fn release_connection(&self, handle: *mut c_void) {
        free_provider(handle);
    }

    fn start_event_source(&self) {
        // SAFETY: no preconditions.
        unsafe { start_device_watcher() }
    }

    fn poll_event(&self, out_event: &mut c_int) -> bool {
        // SAFETY: `out_event` is a valid exclusive reference.
        unsafe { poll_event(out_event) }
    }

    unsafe fn get_info(&self, kind: InfoKind, handle: *mut c_void) -> RawResult {
        match kind {
            InfoKind::Battery => get_battery_info(handle),
            InfoKind::Storage => get_storage_info(handle),
            InfoKind::Hardware => get_hardware_info(handle),
            InfoKind::Os => get_os_info(handle),
            InfoKind::Device => get_device_info(handle),
        }
    }

    unsafe fn list_directory(&self, path: *const c_char, handle: *mut c_void) -> RawResult {
        let tree = list_path_ffi(path, handle);
        if tree.is_null() {
            let shown = CStr::from_ptr(path).to_string_lossy().into_owned();
            return RawResult::err(self.owned_error(&format!("could not list {shown}")));
        }
        RawResult::ok(tree.cast())
    }

    unsafe fn release_tree(&self, tree: *mut FsTreeFfi) {
        free_fstree(tree);
    }

    unsafe fn download(
        &self,
        src: *const c_char,
        dst: *const c_char,
        handle: *mut c_void,
        on_progress: ProgressFn,
        user_data: *mut c_void,
    ) {
        let _serial = DOWNLOAD_LOCK.lock();
        {
            let mut slot = PROGRESS.lock();
            slot.callback = Some(on_progress);
            slot.user_data = user_data as usize;
        }
        download_a_file(src, dst, handle, relay_progress);
        let mut slot = PROGRESS.lock();
        slot.callback = None;
        slot.user_data = 0;
    }

    unsafe fn release_string(&self, s: *mut c_char) {
        if self.owned_errors.lock().remove(&(s as usize)) {
            drop(CString::from_raw(s));
        } else if !s.is_null() {
            free_c_string(s);
        }
    }
}
