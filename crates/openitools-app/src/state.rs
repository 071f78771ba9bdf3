/// Application state — the single control context.
///
/// Every state change happens here, on whichever thread owns the
/// [`AppState`]. The monitor thread and the worker pool only post
/// [`ControlMessage`]s into one channel; [`AppState::process_messages`]
/// applies them serially, in posting order, subject to a per-tick budget.
///
/// Results are tagged with the [`SessionId`] they were produced under. A
/// result whose session is no longer current arrived after a disconnect
/// and is discarded, so a disconnect always wins over an in-flight fetch.
///
/// Collaborators (a GUI, the CLI) call the intent methods and read
/// [`UiUpdate`]s from [`AppState::drain_updates`].
use crate::config::AppConfig;
use crate::workers::build_worker_pool;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use openitools_core::browser;
use openitools_core::info::{fetch_info, DeviceInfoAggregator, InfoSubscriber};
use openitools_core::model::{ConnectionEvent, DeviceState, ExpansionState, FsEntry, RemoteTree};
use openitools_core::monitor::{start_monitor, MonitorHandle};
use openitools_core::native::NativeAdapter;
use openitools_core::session::{DeviceSession, SessionId};
use openitools_core::transfer::{ActiveTransfer, TransferJob, TransferManager, TransferUpdate};
use openitools_core::DeviceError;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of messages that may queue up in the control channel.
///
/// Producers block when it is full, so a caller that stops ticking slows
/// down the monitor and workers instead of growing the heap.
pub const CONTROL_CHANNEL_CAPACITY: usize = 4_096;

/// Maximum notices kept for display. The oldest is dropped first.
const MAX_NOTICES: usize = 32;

/// Everything posted back to the control context.
#[derive(Debug)]
pub enum ControlMessage {
    Connection(ConnectionEvent),
    InfoFetched {
        session: SessionId,
        result: Result<DeviceState, DeviceError>,
    },
    Expanded {
        session: SessionId,
        path: String,
        result: Result<Vec<FsEntry>, DeviceError>,
    },
    Transfer(TransferUpdate),
}

impl From<ConnectionEvent> for ControlMessage {
    fn from(event: ConnectionEvent) -> Self {
        Self::Connection(event)
    }
}

impl From<TransferUpdate> for ControlMessage {
    fn from(update: TransferUpdate) -> Self {
        Self::Transfer(update)
    }
}

/// Where the device connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No device attached, or none reported yet.
    Idle,
    /// A session is live.
    Connected(SessionId),
    /// A device was reported but acquisition failed. Waiting for a retry.
    AcquireFailed,
}

/// A user-facing problem report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    /// Offer a retry button (acquisition failures only).
    pub retryable: bool,
}

/// Changes a collaborator should render.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    DeviceConnected(SessionId),
    DeviceDisconnected,
    DeviceInfoChanged(DeviceState),
    EntriesLoaded { path: String, entries: Vec<FsEntry> },
    TransferProgress { source: String, percent: u8 },
    TransferFinished {
        job: TransferJob,
        result: Result<(), DeviceError>,
    },
    Notice(Notice),
}

pub struct AppState {
    adapter: NativeAdapter,
    config: AppConfig,

    // ── Plumbing ───────────────────────────────────────
    control_tx: Sender<ControlMessage>,
    control_rx: Receiver<ControlMessage>,
    workers: rayon::ThreadPool,
    monitor: Option<MonitorHandle>,

    // ── Session ────────────────────────────────────────
    session: Option<DeviceSession>,
    last_session: SessionId,
    phase: ConnectionPhase,

    // ── Device data ────────────────────────────────────
    info: DeviceInfoAggregator,
    tree: RemoteTree,
    transfers: TransferManager,

    // ── Output ─────────────────────────────────────────
    notices: Vec<Notice>,
    updates: VecDeque<UiUpdate>,
}

impl AppState {
    /// Validate `config` and build the worker pool. Nothing touches the
    /// device until [`start_monitor`](Self::start_monitor) or a connection
    /// event.
    pub fn new(adapter: NativeAdapter, config: AppConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let workers = build_worker_pool(config.workers.threads)?;
        let (control_tx, control_rx) = crossbeam_channel::bounded(CONTROL_CHANNEL_CAPACITY);
        let info = DeviceInfoAggregator::new(config.info.kinds.clone());

        Ok(Self {
            adapter,
            config,
            control_tx,
            control_rx,
            workers,
            monitor: None,
            session: None,
            last_session: SessionId::default(),
            phase: ConnectionPhase::Idle,
            info,
            tree: RemoteTree::new(),
            transfers: TransferManager::new(),
            notices: Vec::new(),
            updates: VecDeque::new(),
        })
    }

    /// Start the connection event monitor. Calling it again is a no-op.
    pub fn start_monitor(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        self.monitor = Some(start_monitor(
            self.adapter.clone(),
            self.config.poll_interval(),
            self.control_tx.clone(),
        ));
    }

    // ── Accessors ──────────────────────────────────────

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(DeviceSession::id)
    }

    pub fn device_info(&self) -> &DeviceState {
        self.info.state()
    }

    pub fn tree(&self) -> &RemoteTree {
        &self.tree
    }

    pub fn active_transfer(&self) -> Option<&ActiveTransfer> {
        self.transfers.active()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Register an observer of device metadata changes.
    pub fn subscribe_info(&mut self, subscriber: InfoSubscriber) {
        self.info.subscribe(subscriber);
    }

    /// Take every pending update, oldest first.
    pub fn drain_updates(&mut self) -> Vec<UiUpdate> {
        self.updates.drain(..).collect()
    }

    pub fn dismiss_notice(&mut self, index: usize) -> Option<Notice> {
        (index < self.notices.len()).then(|| self.notices.remove(index))
    }

    // ── Message processing ─────────────────────────────

    /// Apply pending control messages without blocking.
    ///
    /// Returns `true` if anything was applied.
    pub fn process_messages(&mut self) -> bool {
        let budget = self.config.control.max_messages_per_tick;
        let mut applied = 0usize;
        while applied < budget {
            let msg = match self.control_rx.try_recv() {
                Ok(m) => m,
                Err(_) => break,
            };
            applied += 1;
            self.apply(msg);
        }
        applied > 0
    }

    /// Wait up to `timeout` for a message, then apply what is pending.
    pub fn tick(&mut self, timeout: Duration) -> bool {
        match self.control_rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.apply(msg);
                self.process_messages();
                true
            }
            Err(_) => false,
        }
    }

    fn apply(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Connection(event) => self.handle_connection_event(event),
            ControlMessage::InfoFetched { session, result } => {
                self.handle_info_result(session, result)
            }
            ControlMessage::Expanded {
                session,
                path,
                result,
            } => self.handle_expansion_result(session, path, result),
            ControlMessage::Transfer(update) => self.handle_transfer_update(update),
        }
    }

    // ── Connection reducer ─────────────────────────────

    /// Apply one connection event. Repeated events are no-ops.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                if let Some(session) = &self.session {
                    debug!("Connected while session {} is live; ignoring", session.id());
                    return;
                }
                self.connect();
            }
            ConnectionEvent::Disconnected => self.disconnect(),
        }
    }

    /// User-driven retry after a failed acquisition.
    ///
    /// Returns `true` if a session is live afterwards.
    pub fn retry_connect(&mut self) -> bool {
        if self.session.is_none() {
            self.notices.retain(|n| !n.retryable);
            self.connect();
        }
        self.session.is_some()
    }

    fn connect(&mut self) {
        let id = self.last_session.next();
        match DeviceSession::create(&self.adapter, id) {
            Ok(session) => {
                info!("Device connected (session {id})");
                self.last_session = id;
                self.session = Some(session);
                self.phase = ConnectionPhase::Connected(id);
                self.updates.push_back(UiUpdate::DeviceConnected(id));
                self.refresh_info();
            }
            Err(e) => {
                warn!("Device acquisition failed: {e}");
                self.phase = ConnectionPhase::AcquireFailed;
                self.push_notice(e.user_message(), e.is_retryable());
            }
        }
    }

    fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            if self.phase == ConnectionPhase::AcquireFailed {
                self.phase = ConnectionPhase::Idle;
            }
            debug!("Disconnected without a session; nothing to do");
            return;
        };

        info!("Device disconnected (session {})", session.id());
        session.dispose();
        self.phase = ConnectionPhase::Idle;

        let had_info = !self.info.state().is_empty();
        self.info.clear();
        self.tree = RemoteTree::new();

        self.updates.push_back(UiUpdate::DeviceDisconnected);
        if had_info {
            self.updates
                .push_back(UiUpdate::DeviceInfoChanged(DeviceState::new()));
        }
    }

    // ── Device info ────────────────────────────────────

    /// Re-fetch device metadata in the background.
    pub fn refresh_info(&mut self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let link = session.share();
        let kinds = self.info.kinds().to_vec();
        let tx = self.control_tx.clone();
        self.workers.spawn(move || {
            let result = fetch_info(&link, &kinds);
            let session = link.id();
            drop(link);
            let _ = tx.send(ControlMessage::InfoFetched { session, result });
        });
        true
    }

    fn handle_info_result(&mut self, session: SessionId, result: Result<DeviceState, DeviceError>) {
        if !self.is_current(session) {
            debug!("Discarding device info from stale session {session}");
            return;
        }
        match result {
            Ok(state) => {
                if self.info.apply(state) {
                    self.updates
                        .push_back(UiUpdate::DeviceInfoChanged(self.info.state().clone()));
                }
            }
            Err(e) => {
                warn!("Device info fetch failed: {e}");
                let message = format!("Failed to get the device info: {}", e.user_message());
                self.push_notice(message, false);
            }
        }
    }

    // ── Filesystem browsing ────────────────────────────

    /// List a directory's children in the background.
    ///
    /// Returns `false` without a session, or if `path` is not a
    /// materialized directory.
    pub fn request_expand(&mut self, path: &str) -> bool {
        let Some(session) = &self.session else {
            debug!("Expand of {path} requested without a device");
            return false;
        };
        let path = browser::normalize_device_path(path);
        if !self.tree.mark_loading(&path) {
            debug!("Expand of {path} ignored: not a known directory");
            return false;
        }

        let link = session.share();
        let tx = self.control_tx.clone();
        self.workers.spawn(move || {
            let result = browser::expand(&link, &path);
            let session = link.id();
            drop(link);
            let _ = tx.send(ControlMessage::Expanded {
                session,
                path,
                result,
            });
        });
        true
    }

    pub fn collapse(&mut self, path: &str) -> bool {
        self.tree.collapse(path)
    }

    fn handle_expansion_result(
        &mut self,
        session: SessionId,
        path: String,
        result: Result<Vec<FsEntry>, DeviceError>,
    ) {
        if !self.is_current(session) {
            debug!("Discarding listing of {path} from stale session {session}");
            return;
        }
        // Collapsed (or collapsed and re-created) while the listing was in flight.
        if self.tree.state(&path) != &ExpansionState::Loading {
            debug!("Discarding listing of {path}: no longer loading");
            return;
        }
        match result {
            Ok(entries) => {
                if self.tree.apply_expansion(&path, entries.clone()) {
                    self.updates
                        .push_back(UiUpdate::EntriesLoaded { path, entries });
                } else {
                    debug!("Listing of {path} arrived for a node that is gone");
                }
            }
            Err(e) => {
                warn!("Listing {path} failed: {e}");
                let message = e.user_message();
                self.tree.mark_failed(&path, message.clone());
                self.push_notice(format!("Could not open {path}: {message}"), false);
            }
        }
    }

    // ── Downloads ──────────────────────────────────────

    /// Start downloading `source` from the device to the local `destination`.
    pub fn request_download(&mut self, source: &str, destination: impl Into<PathBuf>) -> bool {
        let Some(session) = &self.session else {
            self.push_notice("No device connected".to_string(), false);
            return false;
        };
        let job = TransferJob::new(source, destination);
        let link = session.share();
        match self
            .transfers
            .start(&self.workers, link, job, self.control_tx.clone())
        {
            Ok(_) => true,
            Err(busy) => {
                self.push_notice(busy.to_string(), false);
                false
            }
        }
    }

    fn handle_transfer_update(&mut self, update: TransferUpdate) {
        match update {
            TransferUpdate::Progress { id, percent } => {
                if self.transfers.on_progress(id, percent) {
                    if let Some(active) = self.transfers.active() {
                        self.updates.push_back(UiUpdate::TransferProgress {
                            source: active.job.source.clone(),
                            percent,
                        });
                    }
                }
            }
            TransferUpdate::Finished { id, job, result } => {
                self.transfers.finish(id);
                match &result {
                    Ok(()) => info!(
                        "Downloaded {} to {}",
                        job.source,
                        job.destination.display()
                    ),
                    Err(e) => {
                        warn!("Download of {} failed: {e}", job.source);
                        self.push_notice(
                            format!("Download of {} failed: {}", job.source, e.user_message()),
                            false,
                        );
                    }
                }
                self.updates
                    .push_back(UiUpdate::TransferFinished { job, result });
            }
        }
    }

    // ── Helpers ────────────────────────────────────────

    fn is_current(&self, session: SessionId) -> bool {
        self.session_id() == Some(session)
    }

    fn push_notice(&mut self, message: String, retryable: bool) {
        let notice = Notice { message, retryable };
        if self.notices.len() >= MAX_NOTICES {
            self.notices.remove(0);
        }
        self.notices.push(notice.clone());
        self.updates.push_back(UiUpdate::Notice(notice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openitools_core::native::FakeNative;
    use std::sync::Arc;

    fn state_with(fake: &Arc<FakeNative>) -> AppState {
        AppState::new(NativeAdapter::new(fake.clone()), AppConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.workers.threads = 0;
        let fake = Arc::new(FakeNative::new());
        assert!(AppState::new(NativeAdapter::new(fake), config).is_err());
    }

    #[test]
    fn disconnect_without_session_is_a_no_op() {
        let fake = Arc::new(FakeNative::new());
        let mut state = state_with(&fake);
        state.handle_connection_event(ConnectionEvent::Disconnected);
        assert_eq!(state.phase(), ConnectionPhase::Idle);
        assert!(state.drain_updates().is_empty());
        assert_eq!(fake.handles_released(), 0);
    }

    #[test]
    fn duplicate_connected_keeps_one_handle() {
        let fake = Arc::new(FakeNative::new());
        let mut state = state_with(&fake);
        state.handle_connection_event(ConnectionEvent::Connected);
        state.handle_connection_event(ConnectionEvent::Connected);
        assert_eq!(fake.acquire_calls(), 1);
        assert_eq!(fake.live_handles(), 1);
        assert_eq!(state.phase(), ConnectionPhase::Connected(SessionId(1)));
    }

    #[test]
    fn expand_requires_known_directory() {
        let fake = Arc::new(FakeNative::new());
        let mut state = state_with(&fake);
        assert!(!state.request_expand("/"));
        state.handle_connection_event(ConnectionEvent::Connected);
        assert!(!state.request_expand("/not/listed"));
        assert!(state.request_expand("\\"));
    }

    #[test]
    fn download_without_device_posts_notice() {
        let fake = Arc::new(FakeNative::new());
        let mut state = state_with(&fake);
        assert!(!state.request_download("/a", "/tmp/a"));
        assert_eq!(state.notices()[0].message, "No device connected");
    }

    #[test]
    fn dismiss_notice_removes_by_index() {
        let fake = Arc::new(FakeNative::new());
        fake.fail_acquire("no device");
        let mut state = state_with(&fake);
        state.handle_connection_event(ConnectionEvent::Connected);
        assert_eq!(state.notices().len(), 1);
        assert!(state.dismiss_notice(3).is_none());
        assert!(state.dismiss_notice(0).is_some());
        assert!(state.notices().is_empty());
    }
}
