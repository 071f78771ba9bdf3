/// File transfer manager — device-to-local downloads off the control thread.
///
/// A download is one blocking native call that reports progress through a
/// callback. [`TransferManager::start`] runs it on a worker pool and turns
/// each callback into a [`TransferUpdate`] message; the control context
/// feeds those back through [`TransferManager::on_progress`] and
/// [`TransferManager::finish`]. Only one transfer is active at a time.
///
/// Progress values are not guaranteed to be monotonic or exhaustive. 100 is
/// the only completion signal.
use crate::error::DeviceError;
use crate::model::normalize_device_path;
use crate::session::{DeviceLink, SessionId};
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to copy and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferJob {
    /// Normalised device path.
    pub source: String,
    /// Local filesystem path.
    pub destination: PathBuf,
}

impl TransferJob {
    pub fn new(source: &str, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: normalize_device_path(source),
            destination: destination.into(),
        }
    }
}

/// Identity of one started transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TransferId(pub u64);

/// Messages posted from a running transfer back to the control context.
#[derive(Debug)]
pub enum TransferUpdate {
    Progress {
        id: TransferId,
        percent: u8,
    },
    Finished {
        id: TransferId,
        job: TransferJob,
        result: Result<(), DeviceError>,
    },
}

/// A transfer was requested while another one is still running.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("a download is already in progress: {active}")]
pub struct TransferBusy {
    pub active: String,
}

/// Filters raw native progress before it reaches an observer.
///
/// Values above 100 are clamped; a value equal to the previous one is
/// dropped.
pub struct ProgressRelay<F> {
    sink: F,
    last: Option<u8>,
    completed: bool,
}

impl<F: FnMut(u8)> ProgressRelay<F> {
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            last: None,
            completed: false,
        }
    }

    pub fn report(&mut self, raw: u8) {
        let percent = raw.min(100);
        if self.last == Some(percent) {
            return;
        }
        self.last = Some(percent);
        if percent == 100 {
            self.completed = true;
        }
        (self.sink)(percent);
    }

    /// `true` once 100 has been seen.
    pub fn is_complete(&self) -> bool {
        self.completed
    }
}

/// Run one download on the calling thread.
///
/// Fails with an I/O error if the native call returns without ever
/// reporting 100.
pub fn run_download(
    link: &DeviceLink,
    job: &TransferJob,
    on_progress: impl FnMut(u8) + Send,
) -> Result<(), DeviceError> {
    let mut relay = ProgressRelay::new(on_progress);
    link.adapter().download(
        link.handle(),
        &job.source,
        &job.destination,
        &mut |percent| relay.report(percent),
    )?;
    if relay.is_complete() {
        Ok(())
    } else {
        Err(DeviceError::Io("transfer ended before completion".into()))
    }
}

/// The transfer currently in flight.
#[derive(Clone, Debug)]
pub struct ActiveTransfer {
    pub id: TransferId,
    pub session: SessionId,
    pub job: TransferJob,
    /// Last relayed percentage, if any.
    pub percent: Option<u8>,
}

#[derive(Debug, Default)]
pub struct TransferManager {
    next_id: u64,
    active: Option<ActiveTransfer>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ActiveTransfer> {
        self.active.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Start `job` on `pool`. Updates arrive on `tx` as `M::from(update)`.
    ///
    /// The worker holds `link` until the native call returns, so the
    /// session's handle outlives the transfer even if the session is
    /// disposed meanwhile.
    pub fn start<M>(
        &mut self,
        pool: &rayon::ThreadPool,
        link: Arc<DeviceLink>,
        job: TransferJob,
        tx: Sender<M>,
    ) -> Result<TransferId, TransferBusy>
    where
        M: From<TransferUpdate> + Send + 'static,
    {
        if let Some(active) = &self.active {
            return Err(TransferBusy {
                active: active.job.source.clone(),
            });
        }

        self.next_id += 1;
        let id = TransferId(self.next_id);
        info!(
            "Download {} -> {} started",
            job.source,
            job.destination.display()
        );
        self.active = Some(ActiveTransfer {
            id,
            session: link.id(),
            job: job.clone(),
            percent: None,
        });

        pool.spawn(move || {
            let progress_tx = tx.clone();
            let result = run_download(&link, &job, move |percent| {
                let _ = progress_tx.send(M::from(TransferUpdate::Progress { id, percent }));
            });
            drop(link);
            let _ = tx.send(M::from(TransferUpdate::Finished { id, job, result }));
        });
        Ok(id)
    }

    /// Record a relayed percentage. Returns `false` for an unknown transfer.
    pub fn on_progress(&mut self, id: TransferId, percent: u8) -> bool {
        match &mut self.active {
            Some(active) if active.id == id => {
                active.percent = Some(percent);
                true
            }
            _ => {
                debug!("Progress for unknown transfer {id:?} ignored");
                false
            }
        }
    }

    /// Close out a transfer, freeing the slot for the next one.
    pub fn finish(&mut self, id: TransferId) -> Option<ActiveTransfer> {
        match &self.active {
            Some(active) if active.id == id => self.active.take(),
            _ => {
                warn!("Completion for unknown transfer {id:?} ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relayed(raw: &[u8]) -> (Vec<u8>, bool) {
        let mut seen = Vec::new();
        let complete = {
            let mut relay = ProgressRelay::new(|p| seen.push(p));
            for &p in raw {
                relay.report(p);
            }
            relay.is_complete()
        };
        (seen, complete)
    }

    #[test]
    fn relay_passes_distinct_values_through() {
        assert_eq!(relayed(&[0, 57, 100]), (vec![0, 57, 100], true));
    }

    #[test]
    fn relay_drops_repeats_and_clamps() {
        assert_eq!(relayed(&[3, 3, 3, 40, 250]), (vec![3, 40, 100], true));
    }

    #[test]
    fn relay_tolerates_non_monotonic_values() {
        assert_eq!(relayed(&[10, 5, 10]), (vec![10, 5, 10], false));
    }

    #[test]
    fn job_source_is_normalised() {
        let job = TransferJob::new("\\DCIM\\IMG_0001.JPG", "/tmp/out.jpg");
        assert_eq!(job.source, "/DCIM/IMG_0001.JPG");
    }

    #[test]
    fn finish_ignores_unknown_ids() {
        let mut manager = TransferManager::new();
        assert!(manager.finish(TransferId(9)).is_none());
        assert!(!manager.on_progress(TransferId(9), 50));
    }
}
