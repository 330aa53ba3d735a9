//! Incremental directory scan and reconciliation.
//!
//! Files on disk are diffed against the notes stored under the target
//! prefix: unseen paths are added, newer mtimes are re-hashed (through
//! the file-hash cache) and re-stored when content actually changed, and
//! stored notes whose file disappeared are removed together with their
//! chunks, vectors, and FTS row.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::debug;

use spall_core::types::{Note, ScanReport};
use spall_core::{CorpusId, Error, Event, EventBus, RequestContext, Result, ScanStatus};
use spall_sqlite::{content_hash, Storage};

use crate::paths;

/// Runs one scan/reconcile pass. Returns what changed plus the note ids
/// awaiting embedding; modified notes have their old chunk and vector
/// rows cleared eagerly so the embed step is the only writer left.
pub async fn scan(
    storage: &Storage,
    bus: &Arc<EventBus>,
    ctx: &RequestContext,
    dir: &Path,
    pattern: &str,
    corpus: CorpusId,
    prefix: &str,
) -> Result<ScanReport> {
    storage.get_corpus_by_id(corpus)?;
    let prefix = paths::canonicalize(prefix);

    let files = enumerate(dir, pattern)?;
    let mut stored: HashMap<String, Note> = storage
        .list_notes_under(corpus, &prefix)?
        .into_iter()
        .map(|note| (note.path.clone(), note))
        .collect();

    bus.publish(Event::ScanStart {
        num_files: files.len() as u64,
    })
    .await;

    let mut report = ScanReport::default();
    let mut visited: HashSet<String> = HashSet::new();

    for file in &files {
        ctx.checkpoint().await?;
        let rel = file.strip_prefix(dir).unwrap_or(file);
        let stored_path = paths::join_prefix(&prefix, &rel.to_string_lossy());
        visited.insert(stored_path.clone());

        let meta = std::fs::metadata(file)?;
        let mtime = mtime_ms(&meta)?;
        let cache_key = file.to_string_lossy().to_string();

        let status = match stored.get(&stored_path) {
            None => {
                let content = std::fs::read_to_string(file)?;
                let hash = content_hash(&content);
                storage.file_hash_upsert(&cache_key, &hash, mtime)?;
                // Sibling files may legitimately share content, so the
                // scanner always inserts with the dupe override.
                let note =
                    storage.add_note_with_mtime(corpus, &stored_path, &content, mtime, true)?;
                report.added.push(stored_path.clone());
                report.unembedded.push(note.id);
                ScanStatus::Added
            }
            Some(note) if mtime > note.mtime => {
                let mut content: Option<String> = None;
                let hash = match storage.file_hash_get(&cache_key, mtime)? {
                    Some(cached) => cached,
                    None => {
                        let body = std::fs::read_to_string(file)?;
                        let hash = content_hash(&body);
                        storage.file_hash_upsert(&cache_key, &hash, mtime)?;
                        content = Some(body);
                        hash
                    }
                };
                if hash != note.content_hash {
                    let body = match content {
                        Some(body) => body,
                        None => std::fs::read_to_string(file)?,
                    };
                    let note_id = note.id;
                    storage.update_note_with_mtime(note_id, &body, mtime, true)?;
                    storage.clear_embeddings(note_id)?;
                    report.modified.push(stored_path.clone());
                    report.unembedded.push(note_id);
                    ScanStatus::Modified
                } else {
                    storage.touch_note_mtime(note.id, mtime)?;
                    ScanStatus::Ok
                }
            }
            Some(_) => ScanStatus::Ok,
        };
        bus.publish(Event::ScanProgress {
            path: stored_path,
            status,
        })
        .await;
    }

    let mut removed: Vec<(String, Note)> = stored
        .drain()
        .filter(|(path, _)| !visited.contains(path))
        .collect();
    removed.sort_by(|a, b| a.0.cmp(&b.0));
    for (path, note) in removed {
        ctx.checkpoint().await?;
        storage.delete_note(note.id)?;
        report.removed.push(path.clone());
        bus.publish(Event::ScanProgress {
            path,
            status: ScanStatus::Removed,
        })
        .await;
    }

    bus.publish(Event::ScanDone {
        num_files: files.len() as u64,
    })
    .await;

    debug!(
        added = report.added.len(),
        modified = report.modified.len(),
        removed = report.removed.len(),
        "scan complete"
    );
    Ok(report)
}

fn enumerate(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&full)
        .map_err(|e| Error::other(format!("bad glob pattern {pattern}: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn mtime_ms(meta: &std::fs::Metadata) -> Result<i64> {
    let modified = meta.modified()?;
    let duration = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::other(format!("mtime before epoch: {e}")))?;
    Ok(duration.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn fixture() -> (Storage, Arc<EventBus>, RequestContext, tempfile::TempDir) {
        let storage = Storage::open_in_memory("test-model", 4).unwrap();
        (
            storage,
            Arc::new(EventBus::new()),
            RequestContext::new(),
            tempfile::tempdir().unwrap(),
        )
    }

    fn bump_mtime(path: &Path, forward: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + forward).unwrap();
    }

    const DEFAULT: CorpusId = CorpusId(1);

    #[tokio::test]
    async fn first_scan_adds_matching_files() {
        let (storage, bus, ctx, tmp) = fixture();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::write(tmp.path().join("b.md"), "beta").unwrap();
        fs::write(tmp.path().join("ignored.txt"), "nope").unwrap();

        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();

        assert_eq!(report.added, vec!["a.md", "b.md"]);
        assert!(report.modified.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.unembedded.len(), 2);
        assert_eq!(storage.get_note(DEFAULT, "a.md").unwrap().content, "alpha");
    }

    #[tokio::test]
    async fn prefix_is_prepended_to_stored_paths() {
        let (storage, bus, ctx, tmp) = fixture();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();

        scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "imported")
            .await
            .unwrap();

        assert!(storage.get_note(DEFAULT, "imported/a.md").is_ok());
    }

    #[tokio::test]
    async fn unchanged_rescan_is_all_ok() {
        let (storage, bus, ctx, tmp) = fixture();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();

        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(report.unembedded.is_empty());
    }

    #[tokio::test]
    async fn changed_content_is_modified_and_cleared() {
        let (storage, bus, ctx, tmp) = fixture();
        let file = tmp.path().join("a.md");
        fs::write(&file, "v1").unwrap();
        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();
        let note_id = report.unembedded[0];
        storage
            .save_embeddings(
                note_id,
                &[spall_core::types::Chunk {
                    text: "v1".into(),
                    pos: 0,
                }],
                &[vec![1.0, 0.0, 0.0, 0.0]],
            )
            .unwrap();

        fs::write(&file, "v2").unwrap();
        bump_mtime(&file, Duration::from_secs(2));

        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();
        assert_eq!(report.modified, vec!["a.md"]);
        assert_eq!(report.unembedded, vec![note_id]);
        // Old chunks and vectors are cleared eagerly.
        assert_eq!(storage.chunks_for_note(note_id).unwrap().len(), 0);
        assert_eq!(storage.vector_row_count().unwrap(), 0);
        assert_eq!(storage.get_note_by_id(note_id).unwrap().content, "v2");
    }

    #[tokio::test]
    async fn touched_but_identical_file_stays_ok() {
        let (storage, bus, ctx, tmp) = fixture();
        let file = tmp.path().join("a.md");
        fs::write(&file, "same").unwrap();
        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();
        let note_id = report.unembedded[0];
        storage
            .save_embeddings(
                note_id,
                &[spall_core::types::Chunk {
                    text: "same".into(),
                    pos: 0,
                }],
                &[vec![1.0, 0.0, 0.0, 0.0]],
            )
            .unwrap();
        let old_mtime = storage.get_note_by_id(note_id).unwrap().mtime;

        bump_mtime(&file, Duration::from_secs(2));
        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();

        assert!(report.is_empty());
        // mtime was refreshed, chunks were not touched.
        assert!(storage.get_note_by_id(note_id).unwrap().mtime > old_mtime);
        assert_eq!(storage.chunks_for_note(note_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleted_file_removes_note_and_derived_rows() {
        let (storage, bus, ctx, tmp) = fixture();
        let file = tmp.path().join("a.md");
        fs::write(&file, "going").unwrap();
        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();
        let note_id = report.unembedded[0];
        storage
            .save_embeddings(
                note_id,
                &[spall_core::types::Chunk {
                    text: "going".into(),
                    pos: 0,
                }],
                &[vec![1.0, 0.0, 0.0, 0.0]],
            )
            .unwrap();

        fs::remove_file(&file).unwrap();
        let report = scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();

        assert_eq!(report.removed, vec!["a.md"]);
        assert!(storage.get_note_by_id(note_id).is_err());
        assert_eq!(storage.vector_row_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_events_arrive_in_order() {
        let (storage, bus, ctx, tmp) = fixture();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe(move |event| {
            let sink = sink.clone();
            async move {
                let tag = serde_json::to_value(&event).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string();
                sink.lock().push(tag);
            }
        });

        scan(&storage, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec!["scan.start", "scan.progress", "scan.done"]
        );
    }

    #[tokio::test]
    async fn unknown_corpus_is_typed_not_found() {
        let (storage, bus, ctx, tmp) = fixture();
        let err = scan(&storage, &bus, &ctx, tmp.path(), "*.md", CorpusId(9), "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "corpus.not_found");
    }
}
