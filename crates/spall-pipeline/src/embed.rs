//! Batched embedding of note chunks.
//!
//! Chunks from all pending notes flow through the embedder in batches of
//! [`EMBED_BATCH_SIZE`]; each flushed batch is one storage transaction.
//! A note whose chunks span batches keeps its earlier rows, and the
//! first batch that touches a note clears whatever residue it had.

use std::sync::Arc;

use tracing::debug;

use spall_core::types::Chunk;
use spall_core::{Event, EventBus, NoteId, RequestContext, Result};
use spall_llm::EmbeddingProvider;
use spall_sqlite::Storage;

use crate::chunker;

/// Chunks per embedder batch call.
pub const EMBED_BATCH_SIZE: usize = 16;

struct PendingChunk {
    note_id: NoteId,
    seq: i64,
    chunk: Chunk,
    /// Last chunk of its note; flushing it completes the note.
    last_of_note: bool,
    note_bytes: u64,
}

/// (Re)embeds the given notes: chunk, batch-embed, and transactionally
/// replace each note's chunk + vector rows.
pub async fn embed(
    storage: &Storage,
    provider: &Arc<dyn EmbeddingProvider>,
    bus: &Arc<EventBus>,
    ctx: &RequestContext,
    note_ids: &[NoteId],
) -> Result<()> {
    let mut pending: Vec<PendingChunk> = Vec::new();
    let num_files = note_ids.len() as u64;
    let mut num_chunks = 0u64;
    let mut num_bytes = 0u64;

    for note_id in note_ids {
        let note = storage.get_note_by_id(*note_id)?;
        let chunks = chunker::chunk_text(provider, ctx, &note.content).await?;
        num_chunks += chunks.len() as u64;
        num_bytes += note.size as u64;
        let count = chunks.len();
        for (seq, chunk) in chunks.into_iter().enumerate() {
            pending.push(PendingChunk {
                note_id: *note_id,
                seq: seq as i64,
                chunk,
                last_of_note: seq + 1 == count,
                note_bytes: note.size as u64,
            });
        }
    }

    bus.publish(Event::EmbedStart {
        num_files,
        num_chunks,
        num_bytes,
    })
    .await;

    let mut files_processed = 0u64;
    let mut bytes_processed = 0u64;
    let mut seen_notes: std::collections::HashSet<NoteId> = std::collections::HashSet::new();

    for batch in pending.chunks(EMBED_BATCH_SIZE) {
        ctx.checkpoint().await?;

        let texts: Vec<String> = batch.iter().map(|p| p.chunk.text.clone()).collect();
        let vectors = provider.embed_batch(&texts).await?;

        // Notes entering the stream in this batch get their residual
        // rows cleared inside the same transaction.
        let mut reset: Vec<NoteId> = Vec::new();
        for item in batch {
            if seen_notes.insert(item.note_id) {
                reset.push(item.note_id);
            }
        }
        let items: Vec<(NoteId, i64, Chunk, Vec<f32>)> = batch
            .iter()
            .zip(vectors)
            .map(|(p, vector)| (p.note_id, p.seq, p.chunk.clone(), vector))
            .collect();
        storage.save_chunk_batch(&reset, &items)?;

        for item in batch {
            if item.last_of_note {
                files_processed += 1;
                bytes_processed += item.note_bytes;
            }
        }
        bus.publish(Event::EmbedProgress {
            num_files,
            num_chunks,
            num_bytes,
            num_files_processed: files_processed,
            num_bytes_processed: bytes_processed,
        })
        .await;
    }

    bus.publish(Event::EmbedDone { num_files }).await;
    debug!(files = num_files, chunks = num_chunks, "embed complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spall_core::CorpusId;
    use spall_llm::MockEmbeddingProvider;

    const DEFAULT: CorpusId = CorpusId(1);

    fn fixture() -> (Storage, Arc<dyn EmbeddingProvider>, Arc<EventBus>, RequestContext) {
        (
            Storage::open_in_memory("test-model", 4).unwrap(),
            Arc::new(MockEmbeddingProvider::new(4)),
            Arc::new(EventBus::new()),
            RequestContext::new(),
        )
    }

    #[tokio::test]
    async fn short_note_gets_one_chunk_and_vector() {
        let (storage, provider, bus, ctx) = fixture();
        let note = storage.add_note(DEFAULT, "a.md", "short note", false).unwrap();

        embed(&storage, &provider, &bus, &ctx, &[note.id]).await.unwrap();

        let chunks = storage.chunks_for_note(note.id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(storage.vector_row_count().unwrap(), 1);
        assert_eq!(chunks[0].seq, 0);
    }

    #[tokio::test]
    async fn long_note_spans_batches_with_contiguous_seqs() {
        let (storage, provider, bus, ctx) = fixture();
        // ~20k chars → 44 windows with the char-token mock; several
        // batches of 16.
        let content = "lorem ipsum dolor sit amet ".repeat(750);
        let note = storage.add_note(DEFAULT, "big.md", &content, false).unwrap();

        embed(&storage, &provider, &bus, &ctx, &[note.id]).await.unwrap();

        let chunks = storage.chunks_for_note(note.id).unwrap();
        assert!(chunks.len() > EMBED_BATCH_SIZE);
        let seqs: Vec<i64> = chunks.iter().map(|c| c.seq).collect();
        let expected: Vec<i64> = (0..chunks.len() as i64).collect();
        assert_eq!(seqs, expected);
        assert_eq!(storage.vector_row_count().unwrap(), chunks.len() as u64);
    }

    #[tokio::test]
    async fn reembed_replaces_rows_instead_of_accumulating() {
        let (storage, provider, bus, ctx) = fixture();
        let note = storage.add_note(DEFAULT, "a.md", "stable body", false).unwrap();

        embed(&storage, &provider, &bus, &ctx, &[note.id]).await.unwrap();
        embed(&storage, &provider, &bus, &ctx, &[note.id]).await.unwrap();

        assert_eq!(storage.chunks_for_note(note.id).unwrap().len(), 1);
        assert_eq!(storage.vector_row_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn event_order_is_start_progress_done() {
        let (storage, provider, bus, ctx) = fixture();
        let a = storage.add_note(DEFAULT, "a.md", "alpha", false).unwrap();
        let b = storage.add_note(DEFAULT, "b.md", "beta", false).unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe(move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().push(event);
            }
        });

        embed(&storage, &provider, &bus, &ctx, &[a.id, b.id]).await.unwrap();

        let seen = seen.lock();
        assert!(matches!(
            seen.first(),
            Some(Event::EmbedStart {
                num_files: 2,
                num_chunks: 2,
                ..
            })
        ));
        assert!(matches!(seen.last(), Some(Event::EmbedDone { num_files: 2 })));
        match &seen[1] {
            Event::EmbedProgress {
                num_files_processed,
                num_bytes_processed,
                ..
            } => {
                assert_eq!(*num_files_processed, 2);
                assert_eq!(*num_bytes_processed, 9); // "alpha" + "beta"
            }
            other => panic!("expected embed.progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_propagates_and_leaves_no_partial_batch() {
        let (storage, provider, bus, ctx) = fixture();
        let note = storage.add_note(DEFAULT, "a.md", "body", false).unwrap();
        ctx.abort();

        let err = embed(&storage, &provider, &bus, &ctx, &[note.id])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(storage.vector_row_count().unwrap(), 0);
    }
}
