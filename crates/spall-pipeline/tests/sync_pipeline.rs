//! End-to-end pipeline tests: sync a directory through scan + embed and
//! check the storage invariants after every phase.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use spall_core::{CorpusId, Event, EventBus, RequestContext};
use spall_llm::{EmbeddingProvider, MockEmbeddingProvider};
use spall_sqlite::Storage;

const DEFAULT: CorpusId = CorpusId(1);

fn fixture() -> (
    Storage,
    Arc<dyn EmbeddingProvider>,
    Arc<EventBus>,
    RequestContext,
    tempfile::TempDir,
) {
    (
        Storage::open_in_memory("test-model", 8).unwrap(),
        Arc::new(MockEmbeddingProvider::new(8)),
        Arc::new(EventBus::new()),
        RequestContext::new(),
        tempfile::tempdir().unwrap(),
    )
}

fn bump_mtime(path: &std::path::Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(2))
        .unwrap();
}

#[tokio::test]
async fn add_modify_remove_lifecycle() {
    let (storage, provider, bus, ctx, tmp) = fixture();
    let file = tmp.path().join("a.md");

    // v1: added, one chunk, one vector.
    fs::write(&file, "v1").unwrap();
    let report = spall_pipeline::sync(&storage, &provider, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
        .await
        .unwrap();
    assert_eq!(report.added, vec!["a.md"]);
    let note = storage.get_note(DEFAULT, "a.md").unwrap();
    assert_eq!(storage.chunks_for_note(note.id).unwrap().len(), 1);
    assert_eq!(storage.vector_row_count().unwrap(), 1);

    // v2: modified, old rows replaced, still one chunk and vector.
    fs::write(&file, "v2").unwrap();
    bump_mtime(&file);
    let report = spall_pipeline::sync(&storage, &provider, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
        .await
        .unwrap();
    assert_eq!(report.modified, vec!["a.md"]);
    assert_eq!(storage.get_note(DEFAULT, "a.md").unwrap().content, "v2");
    assert_eq!(storage.chunks_for_note(note.id).unwrap().len(), 1);
    assert_eq!(storage.vector_row_count().unwrap(), 1);

    // Gone: removed, no note, no chunks, no vectors.
    fs::remove_file(&file).unwrap();
    let report = spall_pipeline::sync(&storage, &provider, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
        .await
        .unwrap();
    assert_eq!(report.removed, vec!["a.md"]);
    assert!(storage.get_note(DEFAULT, "a.md").is_err());
    assert_eq!(storage.vector_row_count().unwrap(), 0);
}

#[tokio::test]
async fn every_scanned_note_ends_up_embedded() {
    let (storage, provider, bus, ctx, tmp) = fixture();
    for name in ["one.md", "two.md", "three.md"] {
        fs::write(tmp.path().join(name), format!("content of {name}")).unwrap();
    }

    let report = spall_pipeline::sync(&storage, &provider, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
        .await
        .unwrap();

    assert_eq!(report.unembedded.len(), 3);
    for id in &report.unembedded {
        let chunks = storage.chunks_for_note(*id).unwrap();
        assert!(!chunks.is_empty());
        let seqs: Vec<i64> = chunks.iter().map(|c| c.seq).collect();
        let expected: Vec<i64> = (0..chunks.len() as i64).collect();
        assert_eq!(seqs, expected);
    }
    assert_eq!(storage.vector_row_count().unwrap(), 3);
}

#[tokio::test]
async fn event_stream_has_the_contracted_order() {
    let (storage, provider, bus, ctx, tmp) = fixture();
    fs::write(tmp.path().join("a.md"), "alpha").unwrap();
    fs::write(tmp.path().join("b.md"), "beta").unwrap();

    let seen: Arc<parking_lot::Mutex<Vec<String>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = bus.subscribe(move |event: Event| {
        let sink = sink.clone();
        async move {
            let tag = serde_json::to_value(&event).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string();
            sink.lock().push(tag);
        }
    });

    spall_pipeline::sync(&storage, &provider, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
        .await
        .unwrap();

    let tags = seen.lock().clone();
    assert_eq!(
        tags,
        vec![
            "scan.start",
            "scan.progress",
            "scan.progress",
            "scan.done",
            "embed.start",
            "embed.progress",
            "embed.done",
        ]
    );
}

#[tokio::test]
async fn identical_sibling_files_both_sync() {
    let (storage, provider, bus, ctx, tmp) = fixture();
    fs::write(tmp.path().join("a.md"), "same body").unwrap();
    fs::write(tmp.path().join("b.md"), "same body").unwrap();

    let report = spall_pipeline::sync(&storage, &provider, &bus, &ctx, tmp.path(), "*.md", DEFAULT, "")
        .await
        .unwrap();

    assert_eq!(report.added.len(), 2);
    assert!(storage.get_note(DEFAULT, "a.md").is_ok());
    assert!(storage.get_note(DEFAULT, "b.md").is_ok());
}
