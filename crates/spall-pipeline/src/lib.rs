//! Indexing pipeline: turn raw note content into embedded chunks and
//! keep a corpus in sync with a directory tree.
//!
//! `sync` is the single ingestion verb: a scan/reconcile pass over the
//! directory followed by the embed step for whatever the scan produced.
//! Progress is published to the event bus; cooperative checkpoints make
//! the whole pipeline cancellable from an SSE disconnect.

pub mod chunker;
pub mod embed;
pub mod paths;
pub mod scanner;

use std::path::Path;
use std::sync::Arc;

use spall_core::types::ScanReport;
use spall_core::{CorpusId, EventBus, RequestContext, Result};
use spall_llm::EmbeddingProvider;
use spall_sqlite::Storage;

/// Scan `dir` against `corpus`, then embed everything the scan added or
/// modified.
#[allow(clippy::too_many_arguments)]
pub async fn sync(
    storage: &Storage,
    provider: &Arc<dyn EmbeddingProvider>,
    bus: &Arc<EventBus>,
    ctx: &RequestContext,
    dir: &Path,
    pattern: &str,
    corpus: CorpusId,
    prefix: &str,
) -> Result<ScanReport> {
    let report = scanner::scan(storage, bus, ctx, dir, pattern, corpus, prefix).await?;
    embed::embed(storage, provider, bus, ctx, &report.unembedded).await?;
    Ok(report)
}
