/// Device session — sole owner of the native connection handle.
///
/// A [`DeviceSession`] is created from a successful acquisition and lives
/// until the device disconnects. Dependent components never see the raw
/// handle; they receive a [`DeviceLink`], which can only be obtained from a
/// live session. Workers hold an `Arc<DeviceLink>` for the duration of a
/// job, so the handle is released after the last in-flight native call
/// returns and never while one is running.
use crate::error::DeviceError;
use crate::native::{ConnectionHandle, NativeAdapter};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Generation number of a session. Strictly increasing per control context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only view of a live session, shared with dependent components.
#[derive(Debug)]
pub struct DeviceLink {
    id: SessionId,
    adapter: NativeAdapter,
    handle: ConnectionHandle,
}

impl DeviceLink {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn adapter(&self) -> &NativeAdapter {
        &self.adapter
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

/// An acquired device connection.
#[derive(Debug)]
pub struct DeviceSession {
    link: Arc<DeviceLink>,
}

impl DeviceSession {
    /// Acquire a handle for the attached device.
    ///
    /// On failure nothing is retained; the caller decides whether to retry.
    pub fn create(adapter: &NativeAdapter, id: SessionId) -> Result<Self, DeviceError> {
        let handle = adapter.acquire()?;
        info!("Device session {id} created");
        Ok(Self {
            link: Arc::new(DeviceLink {
                id,
                adapter: adapter.clone(),
                handle,
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.link.id
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    /// A shared reference for a background job. Keeps the handle alive
    /// until the job drops it.
    pub fn share(&self) -> Arc<DeviceLink> {
        Arc::clone(&self.link)
    }

    /// End the session. The handle is released now, or when the last
    /// in-flight job finishes if one is still running.
    pub fn dispose(self) {
        let pending = Arc::strong_count(&self.link) - 1;
        if pending > 0 {
            info!(
                "Device session {} disposed; handle released after {pending} in-flight job(s)",
                self.link.id
            );
        } else {
            info!("Device session {} disposed", self.link.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::FakeNative;

    fn adapter() -> (Arc<FakeNative>, NativeAdapter) {
        let fake = Arc::new(FakeNative::new());
        let adapter = NativeAdapter::new(fake.clone());
        (fake, adapter)
    }

    #[test]
    fn dispose_releases_handle_once() {
        let (fake, adapter) = adapter();
        let session = DeviceSession::create(&adapter, SessionId(1)).unwrap();
        assert_eq!(fake.live_handles(), 1);
        session.dispose();
        assert_eq!(fake.live_handles(), 0);
        assert_eq!(fake.handles_released(), 1);
        assert_eq!(fake.double_releases(), 0);
    }

    #[test]
    fn drop_without_dispose_still_releases() {
        let (fake, adapter) = adapter();
        {
            let _session = DeviceSession::create(&adapter, SessionId(1)).unwrap();
        }
        assert_eq!(fake.handles_released(), 1);
    }

    #[test]
    fn shared_link_defers_release() {
        let (fake, adapter) = adapter();
        let session = DeviceSession::create(&adapter, SessionId(3)).unwrap();
        let job = session.share();
        session.dispose();
        assert_eq!(fake.handles_released(), 0);
        assert_eq!(job.id(), SessionId(3));
        drop(job);
        assert_eq!(fake.handles_released(), 1);
    }

    #[test]
    fn failed_acquire_surfaces_native_message() {
        let (fake, adapter) = adapter();
        fake.fail_acquire("no device");
        let err = DeviceSession::create(&adapter, SessionId(1)).unwrap_err();
        assert_eq!(err, DeviceError::Acquisition("no device".into()));
        assert_eq!(fake.live_allocations(), 0);
        assert_eq!(fake.strings_released(), 1);
    }

    #[test]
    fn session_ids_increase() {
        assert!(SessionId(1).next() > SessionId(1));
        assert_eq!(SessionId::default().next(), SessionId(1));
    }
}
