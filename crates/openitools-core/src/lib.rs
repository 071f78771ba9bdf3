/// OpeniTools Core — device session and native-resource bridge.
///
/// This crate wraps the vendor device library behind owned, typed Rust
/// values and has zero UI dependencies. Everything that touches a native
/// pointer lives in [`native`]; the rest of the crate only sees owned data
/// and a live [`session::DeviceLink`].
///
/// # Modules
///
/// - [`native`] — Raw C surface, the release-safe adapter, and backends.
/// - [`session`] — Exclusive owner of the connection handle.
/// - [`monitor`] — Background poller for connect/disconnect events.
/// - [`info`] — Device metadata fetch and change notification.
/// - [`browser`] — Lazy, one-level directory listing.
/// - [`transfer`] — Downloads with throttled progress relay.
/// - [`model`] — Plain data types shared by all of the above.
pub mod browser;
pub mod error;
pub mod info;
pub mod model;
pub mod monitor;
pub mod native;
pub mod session;
pub mod transfer;

pub use error::DeviceError;
