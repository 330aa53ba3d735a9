//! Streaming model downloader with progress events.

use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use spall_core::{Error, Event, EventBus, ModelInfo, Result};

/// Fetches `url` into `dest`, emitting `model.download`,
/// `model.progress`, and `model.downloaded` on the bus. A file already
/// on disk is not re-fetched.
pub(crate) async fn download_model(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    info: &ModelInfo,
    bus: &Arc<EventBus>,
) -> Result<()> {
    bus.publish(Event::ModelDownload { info: info.clone() }).await;

    if dest.exists() {
        debug!(path = %dest.display(), "model already cached");
        bus.publish(Event::ModelDownloaded { info: info.clone() }).await;
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::model(format!("download {url}: {e}")))?
        .error_for_status()
        .map_err(|e| Error::model(format!("download {url}: {e}")))?;
    let total = response.content_length().unwrap_or(0);

    // Write to a temp name and rename on completion so an interrupted
    // download never looks like a cached model.
    let partial = dest.with_extension("partial");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::model(format!("download {url}: {e}")))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        bus.publish(Event::ModelProgress {
            info: info.clone(),
            downloaded,
            total,
        })
        .await;
    }
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, dest).await?;

    info!(model = %info.name, bytes = downloaded, "model downloaded");
    bus.publish(Event::ModelDownloaded { info: info.clone() }).await;
    Ok(())
}
