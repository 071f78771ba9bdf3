/// Data model for devices and their remote filesystem.
///
/// Everything here is plain owned data; native buffers never reach this
/// module.
pub mod device_path;
pub mod device_state;
pub mod fs_entry;
pub mod remote_tree;
pub mod size;

pub use device_path::{join_device_path, normalize_device_path};
pub use device_state::DeviceState;
pub use fs_entry::{FileKind, FsEntry};
pub use remote_tree::{ExpansionState, RemoteTree, VisibleRow};

/// A device connect or disconnect reported by the native event source.
///
/// The source does not promise strict alternation; consumers must treat
/// repeats as no-ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}
