//! File export of archived channel history as JSON Lines.

use crate::archive::{ArchiveStore, QueryLimit};
use crate::error::{Result, StoreError};

use anyhow::Context as _;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;

/// Write every archived message of `channel_id` to `path`, one JSON object per
/// line in archive order. Returns the number of messages written.
pub async fn export_channel(store: &ArchiveStore, channel_id: &str, path: &Path) -> Result<usize> {
    if store.get_channel(channel_id).await?.is_none() {
        return Err(StoreError::NotFound {
            channel_id: channel_id.to_string(),
        }
        .into());
    }

    let messages = store
        .query_messages(channel_id, QueryLimit::Unbounded, 0)
        .await?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create export directory: {}", parent.display()))?;
    }

    let file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create export file: {}", path.display()))?;
    let mut writer = tokio::io::BufWriter::new(file);
    for message in &messages {
        let mut line = serde_json::to_vec(message).context("failed to serialize message")?;
        line.push(b'\n');
        writer.write_all(&line).await?;
    }
    writer.flush().await?;

    tracing::info!(
        channel_id,
        count = messages.len(),
        path = %path.display(),
        "channel exported"
    );

    Ok(messages.len())
}

/// Default export file name for a channel inside `export_dir`.
pub fn export_path(export_dir: &Path, channel_id: &str) -> PathBuf {
    let safe: String = channel_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    export_dir.join(format!("{safe}_messages.jsonl"))
}
