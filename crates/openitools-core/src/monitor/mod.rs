/// Connection event monitor — turns the native poll queue into messages.
///
/// A single named background thread starts the native event source, then
/// polls it for at most one event per interval and forwards whatever it
/// gets to the control channel. There is no stop signal: the thread exits
/// when the receiving side of the channel is gone, which happens at
/// process shutdown.
///
/// # Usage
///
/// ```ignore
/// let monitor = start_monitor(adapter.clone(), DEFAULT_POLL_INTERVAL, control_tx);
/// // ConnectionEvent values arrive on the control receiver as `M::from(event)`.
/// ```
use crate::model::ConnectionEvent;
use crate::native::NativeAdapter;
use crossbeam_channel::Sender;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Cadence of the native event poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Handle to the running monitor thread.
///
/// Dropping it detaches the thread; it keeps running until the channel
/// closes.
pub struct MonitorHandle {
    thread: thread::JoinHandle<()>,
}

impl MonitorHandle {
    /// Wait for the thread to exit. Only returns once the channel's
    /// receiver has been dropped.
    pub fn join(self) {
        let _ = self.thread.join();
    }
}

/// Start watching for connect/disconnect events.
///
/// Each event is converted with `M::from` and sent on `tx` in the order the
/// native source buffered it.
pub fn start_monitor<M>(adapter: NativeAdapter, interval: Duration, tx: Sender<M>) -> MonitorHandle
where
    M: From<ConnectionEvent> + Send + 'static,
{
    let thread = thread::Builder::new()
        .name("openitools-monitor".to_owned())
        .spawn(move || run_monitor(adapter, interval, tx))
        .expect("failed to spawn monitor thread");

    MonitorHandle { thread }
}

// ─── Background thread ──────────────────────────────────────────────────────

fn run_monitor<M>(adapter: NativeAdapter, interval: Duration, tx: Sender<M>)
where
    M: From<ConnectionEvent>,
{
    info!("Monitor: watching for devices every {} ms", interval.as_millis());
    adapter.start_event_source();

    loop {
        if let Some(event) = adapter.poll_event() {
            debug!("Monitor: {event:?}");
            if tx.send(M::from(event)).is_err() {
                break;
            }
        }
        thread::sleep(interval);
    }

    info!("Monitor: control channel closed, exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::FakeNative;
    use std::sync::Arc;

    #[test]
    fn forwards_events_in_fifo_order() {
        let fake = Arc::new(FakeNative::new());
        fake.push_event(ConnectionEvent::Connected);
        fake.push_event(ConnectionEvent::Disconnected);
        fake.push_event(ConnectionEvent::Connected);

        let (tx, rx) = crossbeam_channel::unbounded::<ConnectionEvent>();
        let monitor = start_monitor(
            NativeAdapter::new(fake.clone()),
            Duration::from_millis(5),
            tx,
        );

        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(
            got,
            vec![
                ConnectionEvent::Connected,
                ConnectionEvent::Disconnected,
                ConnectionEvent::Connected,
            ]
        );
        assert_eq!(fake.event_source_starts(), 1);

        drop(rx);
        fake.push_event(ConnectionEvent::Disconnected);
        monitor.join();
    }

    #[test]
    fn unknown_codes_are_skipped() {
        let fake = Arc::new(FakeNative::new());
        fake.push_raw_event(42);
        fake.push_event(ConnectionEvent::Disconnected);

        let (tx, rx) = crossbeam_channel::unbounded::<ConnectionEvent>();
        let _monitor = start_monitor(NativeAdapter::new(fake), Duration::from_millis(5), tx);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ConnectionEvent::Disconnected
        );
    }
}
