//! Upload coordinator
//!
//! Uploads a batch of files into one folder strictly in submission order.
//!
//! ## Per-file flow
//!
//! 1. Claim a unique name against the names already taken in the folder and
//!    earlier files of the batch (`a.txt` -> `a (1).txt`)
//! 2. Check the cancellation token (before the batch, right before each
//!    store call, and before every retry of that call)
//! 3. Run the store call while a ticker grows an estimate of bytes sent
//!    toward a cap (90% by default) of the file size
//! 4. On success replace the estimate with the real byte count
//!
//! The first failure stops the batch. Files stored before a failure or a
//! cancellation stay stored; nothing is rolled back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dataroom_core::config::UploadConfig;
use dataroom_core::domain::naming::unique_file_name;
use dataroom_core::domain::{DataRoomFile, FolderId, StoreError};
use dataroom_core::ports::IRemoteStore;

use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// One file of an upload batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadItem {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            data,
        }
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Snapshot of an active batch, published on a watch channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub total_files: usize,
    pub completed_files: usize,
    pub total_bytes: u64,
    /// Real bytes of completed files
    pub uploaded_bytes: u64,
    /// Final (disambiguated) name of the file in flight
    pub current_file_name: Option<String>,
    /// Estimated bytes sent for the file in flight; discarded on completion
    pub current_file_estimate: u64,
}

impl UploadProgress {
    /// Bytes to display: completed files plus the in-flight estimate
    pub fn displayed_bytes(&self) -> u64 {
        self.uploaded_bytes + self.current_file_estimate
    }

    /// Whole-batch progress in percent (0-100)
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return if self.completed_files == self.total_files { 100 } else { 0 };
        }
        ((self.displayed_bytes() * 100) / self.total_bytes).min(100) as u8
    }
}

/// Ticker settings for the progress estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSettings {
    pub tick: Duration,
    /// The estimate never exceeds this share of a file's size (percent)
    pub estimate_cap_percent: u8,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.progress_tick_ms.max(1)),
            estimate_cap_percent: config.estimate_cap_percent.min(100),
        }
    }
}

/// A batch that stopped early, with the files stored before it stopped
#[derive(Debug, Clone)]
pub struct BatchAborted {
    pub uploaded: Vec<DataRoomFile>,
    pub error: SyncError,
}

/// Sequential batch uploader over an [`IRemoteStore`]
pub struct UploadCoordinator {
    store: Arc<dyn IRemoteStore>,
    retry: RetryPolicy,
    settings: UploadSettings,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn IRemoteStore>, retry: RetryPolicy, settings: UploadSettings) -> Self {
        Self { store, retry, settings }
    }

    /// Uploads `items` into `folder_id` in order.
    ///
    /// `existing_names` seeds the taken-name set (compared
    /// case-insensitively). Progress snapshots are sent on `progress`.
    #[tracing::instrument(skip_all, fields(folder = %folder_id, files = items.len()))]
    pub async fn run<'a>(
        &self,
        folder_id: &FolderId,
        existing_names: impl IntoIterator<Item = &'a str>,
        items: Vec<UploadItem>,
        cancel: &CancellationToken,
        progress: &watch::Sender<Option<UploadProgress>>,
    ) -> Result<Vec<DataRoomFile>, BatchAborted> {
        let mut taken: HashSet<String> = existing_names.into_iter().map(str::to_lowercase).collect();
        let mut state = UploadProgress {
            total_files: items.len(),
            total_bytes: items.iter().map(UploadItem::size).sum(),
            ..UploadProgress::default()
        };
        progress.send_replace(Some(state.clone()));

        let mut uploaded = Vec::with_capacity(items.len());
        if cancel.is_cancelled() {
            info!("Upload cancelled before start");
            return Err(BatchAborted {
                uploaded,
                error: SyncError::Cancelled { completed: 0 },
            });
        }

        for item in items {
            let name = unique_file_name(&item.name, &mut taken);
            if name != item.name {
                debug!(original = %item.name, renamed = %name, "Disambiguated upload name");
            }
            state.current_file_name = Some(name.clone());
            state.current_file_estimate = 0;
            progress.send_replace(Some(state.clone()));

            if cancel.is_cancelled() {
                info!(completed = uploaded.len(), "Upload cancelled");
                return Err(BatchAborted {
                    error: SyncError::Cancelled {
                        completed: uploaded.len(),
                    },
                    uploaded,
                });
            }

            match self.upload_one(folder_id, &name, &item, cancel, &mut state, progress).await {
                Ok(file) => {
                    state.completed_files += 1;
                    state.uploaded_bytes += item.size();
                    state.current_file_estimate = 0;
                    progress.send_replace(Some(state.clone()));
                    debug!(file_id = %file.id, name = %file.name, "File uploaded");
                    uploaded.push(file);
                }
                Err(StoreError::Cancelled) => {
                    info!(completed = uploaded.len(), "Upload cancelled between attempts");
                    return Err(BatchAborted {
                        error: SyncError::Cancelled {
                            completed: uploaded.len(),
                        },
                        uploaded,
                    });
                }
                Err(e) => {
                    warn!(name = %name, error = %e, completed = uploaded.len(), "Upload failed; aborting batch");
                    return Err(BatchAborted {
                        uploaded,
                        error: SyncError::Store(e),
                    });
                }
            }
        }

        state.current_file_name = None;
        progress.send_replace(Some(state));
        info!(files = uploaded.len(), "Upload batch complete");
        Ok(uploaded)
    }

    /// Runs one store call with the progress ticker alongside it.
    ///
    /// A cancellation seen before a retry ends the call with
    /// `StoreError::Cancelled` instead of storing the file again.
    async fn upload_one(
        &self,
        folder_id: &FolderId,
        name: &str,
        item: &UploadItem,
        cancel: &CancellationToken,
        state: &mut UploadProgress,
        progress: &watch::Sender<Option<UploadProgress>>,
    ) -> Result<DataRoomFile, StoreError> {
        let mime = item.mime_type.as_deref();
        let upload = with_retry("upload_file", &self.retry, || async move {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            self.store.upload_file(folder_id, name, mime, &item.data).await
        });
        tokio::pin!(upload);

        let cap = item.size() * u64::from(self.settings.estimate_cap_percent) / 100;
        let step = (item.size() / 20).max(1);
        let mut ticker = tokio::time::interval(self.settings.tick);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut upload => return result,
                _ = ticker.tick() => {
                    if state.current_file_estimate < cap {
                        state.current_file_estimate = (state.current_file_estimate + step).min(cap);
                        progress.send_replace(Some(state.clone()));
                    }
                }
            }
        }
    }
}
