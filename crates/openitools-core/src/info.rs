/// Device info aggregator — owns the last-known [`DeviceState`].
///
/// Fetching and applying are split: [`fetch_info`] is the blocking native
/// part and runs on a worker, [`DeviceInfoAggregator::apply`] runs on the
/// control context and is the only place the state changes.
use crate::error::DeviceError;
use crate::model::DeviceState;
use crate::native::InfoKind;
use crate::session::DeviceLink;
use tracing::{debug, info};

/// Observer of device metadata changes.
pub type InfoSubscriber = Box<dyn FnMut(&DeviceState) + Send>;

/// Query every kind in `kinds` and merge the mappings.
///
/// Any failing kind fails the whole fetch.
pub fn fetch_info(link: &DeviceLink, kinds: &[InfoKind]) -> Result<DeviceState, DeviceError> {
    let mut merged = DeviceState::new();
    for &kind in kinds {
        let part = link.adapter().device_info(link.handle(), kind)?;
        debug!("Fetched {} info: {} keys", kind.label(), part.len());
        merged.extend(part);
    }
    Ok(merged)
}

pub struct DeviceInfoAggregator {
    kinds: Vec<InfoKind>,
    state: DeviceState,
    subscribers: Vec<InfoSubscriber>,
}

impl DeviceInfoAggregator {
    pub fn new(kinds: Vec<InfoKind>) -> Self {
        Self {
            kinds,
            state: DeviceState::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn kinds(&self) -> &[InfoKind] {
        &self.kinds
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn subscribe(&mut self, subscriber: InfoSubscriber) {
        self.subscribers.push(subscriber);
    }

    /// Fetch and apply in one step, on the calling thread.
    ///
    /// On failure the current state is kept and the error returned.
    pub fn fetch(&mut self, link: &DeviceLink) -> Result<bool, DeviceError> {
        let fetched = fetch_info(link, &self.kinds)?;
        Ok(self.apply(fetched))
    }

    /// Replace the state if `fetched` differs, then notify subscribers.
    /// Returns whether anything changed.
    pub fn apply(&mut self, fetched: DeviceState) -> bool {
        if fetched == self.state {
            debug!("Device info unchanged");
            return false;
        }
        self.state = fetched;
        info!("Device info updated ({} keys)", self.state.len());
        self.notify();
        true
    }

    /// Forget everything (device gone). Notifies only if there was state.
    pub fn clear(&mut self) {
        if self.state.is_empty() {
            return;
        }
        self.state = DeviceState::new();
        self.notify();
    }

    fn notify(&mut self) {
        for subscriber in &mut self.subscribers {
            subscriber(&self.state);
        }
    }
}

impl std::fmt::Debug for DeviceInfoAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInfoAggregator")
            .field("kinds", &self.kinds)
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{FakeNative, NativeAdapter};
    use crate::session::{DeviceSession, SessionId};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn session(fake: &Arc<FakeNative>) -> DeviceSession {
        DeviceSession::create(&NativeAdapter::new(fake.clone()), SessionId(1)).unwrap()
    }

    fn recording(agg: &mut DeviceInfoAggregator) -> Arc<Mutex<Vec<DeviceState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        agg.subscribe(Box::new(move |state| sink.lock().push(state.clone())));
        seen
    }

    #[test]
    fn notifies_only_on_change() {
        let fake = Arc::new(FakeNative::new());
        fake.set_info(InfoKind::Device, r#"{"DeviceName":"Phone"}"#);
        let session = session(&fake);
        let mut agg = DeviceInfoAggregator::new(vec![InfoKind::Device]);
        let seen = recording(&mut agg);

        assert!(agg.fetch(session.link()).unwrap());
        assert!(!agg.fetch(session.link()).unwrap());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(agg.state().get("DeviceName"), Some("Phone"));
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn failure_keeps_last_known_good() {
        let fake = Arc::new(FakeNative::new());
        fake.set_info(InfoKind::Device, r#"{"DeviceName":"Phone"}"#);
        let session = session(&fake);
        let mut agg = DeviceInfoAggregator::new(vec![InfoKind::Device]);
        agg.fetch(session.link()).unwrap();

        fake.fail_info(InfoKind::Device, "lockdown refused");
        let err = agg.fetch(session.link()).unwrap_err();
        assert_eq!(err, DeviceError::Io("lockdown refused".into()));
        assert_eq!(agg.state().get("DeviceName"), Some("Phone"));
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn kinds_are_merged() {
        let fake = Arc::new(FakeNative::new());
        fake.set_info(InfoKind::Device, r#"{"DeviceName":"Phone"}"#);
        fake.set_info(InfoKind::Battery, r#"{"BatteryLevel":"80"}"#);
        let session = session(&fake);

        let state = fetch_info(session.link(), &[InfoKind::Device, InfoKind::Battery]).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("BatteryLevel"), Some("80"));
    }

    #[test]
    fn malformed_result_pair_is_decode_error_and_both_released() {
        let fake = Arc::new(FakeNative::new());
        fake.set_malformed_info(InfoKind::Device);
        let session = session(&fake);

        let err = fetch_info(session.link(), &[InfoKind::Device]).unwrap_err();
        assert!(matches!(err, DeviceError::Decode(_)));
        assert_eq!(fake.strings_released(), 2);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn empty_result_pair_is_decode_error() {
        let fake = Arc::new(FakeNative::new());
        fake.set_empty_info(InfoKind::Device);
        let session = session(&fake);

        let err = fetch_info(session.link(), &[InfoKind::Device]).unwrap_err();
        assert_eq!(
            err,
            DeviceError::Decode("result carried neither a payload nor an error".into())
        );
        assert_eq!(fake.strings_released(), 0);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn non_utf8_payload_is_decode_error_and_released() {
        let fake = Arc::new(FakeNative::new());
        fake.set_non_utf8_info(InfoKind::Device);
        let session = session(&fake);

        let err = fetch_info(session.link(), &[InfoKind::Device]).unwrap_err();
        assert!(matches!(&err, DeviceError::Decode(m) if m.contains("not UTF-8")));
        assert_eq!(fake.strings_released(), 1);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn malformed_json_still_releases_buffer() {
        let fake = Arc::new(FakeNative::new());
        fake.set_info(InfoKind::Device, "{not json");
        let session = session(&fake);

        let err = fetch_info(session.link(), &[InfoKind::Device]).unwrap_err();
        assert!(matches!(err, DeviceError::Decode(_)));
        assert_eq!(fake.strings_released(), 1);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn clear_notifies_once() {
        let mut agg = DeviceInfoAggregator::new(vec![InfoKind::Device]);
        let seen = recording(&mut agg);
        agg.clear();
        assert!(seen.lock().is_empty());

        agg.apply([("k", "v")].into_iter().collect());
        agg.clear();
        agg.clear();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_empty());
    }
}
