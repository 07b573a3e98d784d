//! Upload command
//!
//! Reads the local files, then hands the batch to the engine. Ctrl-C stops
//! the batch after the file in flight; files stored until then are kept.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use dataroom_sync::{SyncError, UploadItem, UploadProgress};

use super::Context;
use crate::output::human_bytes;

/// Arguments for `dataroom upload`
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Destination folder
    pub folder: String,

    /// Local files to upload, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl UploadCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.open().await?;
        let formatter = ctx.formatter();
        let folder = session.folder(&self.folder).await?;

        let mut items = Vec::with_capacity(self.files.len());
        for path in &self.files {
            items.push(read_item(path).await?);
        }
        info!(files = items.len(), folder = %folder, "Starting upload");

        let engine = session.engine.clone();
        let show_progress = !ctx.is_json() && !ctx.quiet;
        let watcher = tokio::spawn({
            let mut progress = engine.subscribe_progress();
            async move {
                while progress.changed().await.is_ok() {
                    let snapshot = progress.borrow_and_update().clone();
                    if let (true, Some(snapshot)) = (show_progress, snapshot) {
                        render_progress(&snapshot);
                    }
                }
            }
        });

        let upload = engine.upload_files(&folder, items);
        tokio::pin!(upload);
        let result = tokio::select! {
            result = &mut upload => result,
            _ = tokio::signal::ctrl_c() => {
                formatter.warn("Interrupted; stopping after the current file");
                engine.cancel_upload();
                upload.await
            }
        };
        watcher.abort();
        if show_progress {
            eprintln!();
        }

        match result {
            Ok(files) => {
                if ctx.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "folder": folder.to_string(),
                        "uploaded": files,
                    }));
                } else {
                    formatter.success(&format!("Uploaded {} file(s) to {folder}", files.len()));
                    for file in &files {
                        formatter.info(&format!("{}  {}", file.name, human_bytes(file.size_bytes.unwrap_or(0))));
                    }
                }
                Ok(())
            }
            Err(SyncError::Cancelled { completed }) => {
                formatter.warn(&format!("Upload cancelled; {completed} file(s) were stored"));
                Ok(())
            }
            Err(err @ SyncError::StaleAfterUpload { .. }) => {
                formatter.warn(&err.to_string());
                Ok(())
            }
            Err(err) => Err(err).context("Upload failed"),
        }
    }
}

async fn read_item(path: &Path) -> Result<UploadItem> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?
        .to_string();
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
    Ok(UploadItem::new(name, data).with_mime_type(mime))
}

fn render_progress(progress: &UploadProgress) {
    let current = progress.current_file_name.as_deref().unwrap_or("");
    eprint!(
        "\r{:>3}%  {}/{} file(s)  {} / {}  {current:<40}",
        progress.percent(),
        progress.completed_files,
        progress.total_files,
        human_bytes(progress.displayed_bytes()),
        human_bytes(progress.total_bytes),
    );
    let _ = std::io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_item_guesses_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let item = read_item(&path).await.unwrap();
        assert_eq!(item.name, "deck.pdf");
        assert_eq!(item.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(item.size(), 8);
    }

    #[tokio::test]
    async fn test_read_item_missing_file() {
        assert!(read_item(Path::new("/nonexistent/file.txt")).await.is_err());
    }
}
