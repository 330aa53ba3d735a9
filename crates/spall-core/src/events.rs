//! Typed event bus.
//!
//! Every interesting state change in the daemon is published as an
//! [`Event`] on a process-wide [`EventBus`]. Subscribers are async
//! callbacks awaited in insertion order, so a slow subscriber (an SSE
//! stream with a full socket buffer) applies backpressure to the
//! publisher. The subscriber list is copied before iteration, which makes
//! it safe to subscribe or unsubscribe from inside a running callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Corpus, Note, Workspace};

/// Identity of a model artifact, carried on `model.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// Per-file status emitted on `scan.progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Added,
    Modified,
    Removed,
    Ok,
}

/// Error body carried on `error` events and HTTP failure responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// The event taxonomy. Serialized as JSON with the dotted tag inlined
/// under `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "store.create")]
    StoreCreate { path: String },
    #[serde(rename = "store.created")]
    StoreCreated { path: String },

    #[serde(rename = "model.download")]
    ModelDownload { info: ModelInfo },
    #[serde(rename = "model.progress")]
    ModelProgress {
        info: ModelInfo,
        downloaded: u64,
        total: u64,
    },
    #[serde(rename = "model.downloaded")]
    ModelDownloaded { info: ModelInfo },
    #[serde(rename = "model.load")]
    ModelLoad { info: ModelInfo },
    #[serde(rename = "model.failed")]
    ModelFailed { error: String },

    #[serde(rename = "scan.start", rename_all = "camelCase")]
    ScanStart { num_files: u64 },
    #[serde(rename = "scan.progress")]
    ScanProgress { path: String, status: ScanStatus },
    #[serde(rename = "scan.done", rename_all = "camelCase")]
    ScanDone { num_files: u64 },

    #[serde(rename = "embed.start", rename_all = "camelCase")]
    EmbedStart {
        num_files: u64,
        num_chunks: u64,
        num_bytes: u64,
    },
    #[serde(rename = "embed.progress", rename_all = "camelCase")]
    EmbedProgress {
        num_files: u64,
        num_chunks: u64,
        num_bytes: u64,
        num_files_processed: u64,
        num_bytes_processed: u64,
    },
    #[serde(rename = "embed.done", rename_all = "camelCase")]
    EmbedDone { num_files: u64 },

    #[serde(rename = "note.created")]
    NoteCreated { info: Note },
    #[serde(rename = "note.updated")]
    NoteUpdated { info: Note },

    #[serde(rename = "corpus.created")]
    CorpusCreated { info: Corpus },
    #[serde(rename = "corpus.updated")]
    CorpusUpdated { info: Corpus },

    #[serde(rename = "workspace.created")]
    WorkspaceCreated { info: Workspace },
    #[serde(rename = "workspace.updated")]
    WorkspaceUpdated { info: Workspace },

    #[serde(rename = "error")]
    Error { error: ErrorBody },

    /// Marker sent once per newly opened event stream.
    #[serde(rename = "sse.connected")]
    SseConnected {},
}

impl Event {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Error {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

type Subscriber = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Process-wide publish/subscribe channel for [`Event`]s.
pub struct EventBus {
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers an async callback. The returned [`Subscription`]
    /// unsubscribes on drop, so a subscription scoped to a request is
    /// released on every exit path.
    pub fn subscribe<F, Fut>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber: Subscriber = Arc::new(move |event| Box::pin(callback(event)));
        self.subscribers.lock().push((id, subscriber));
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    /// Delivers `event` to every current subscriber, in insertion order,
    /// awaiting each one.
    pub async fn publish(&self, event: Event) {
        // Copy-on-iterate: subscribers may be added or removed while we
        // deliver without invalidating this pass.
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in snapshot {
            subscriber(event.clone()).await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the callback.
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn event_json_inlines_dotted_tag() {
        let event = Event::ScanProgress {
            path: "docs/a.md".into(),
            status: ScanStatus::Added,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "scan.progress");
        assert_eq!(json["path"], "docs/a.md");
        assert_eq!(json["status"], "added");
    }

    #[test]
    fn embed_events_are_camel_case() {
        let event = Event::EmbedStart {
            num_files: 2,
            num_chunks: 5,
            num_bytes: 100,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "embed.start");
        assert_eq!(json["numFiles"], 2);
        assert_eq!(json["numChunks"], 5);
        assert_eq!(json["numBytes"], 100);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::error("corpus.not_found", "corpus not found: 7");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        match back {
            Event::Error { error } => {
                assert_eq!(error.code, "corpus.not_found");
                assert_eq!(error.message, "corpus not found: 7");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_in_insertion_order() {
        let bus = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let _s1 = bus.subscribe(move |_| {
            let o1 = o1.clone();
            async move {
                o1.lock().push(1);
            }
        });
        let o2 = order.clone();
        let _s2 = bus.subscribe(move |_| {
            let o2 = o2.clone();
            async move {
                o2.lock().push(2);
            }
        });

        bus.publish(Event::SseConnected {}).await;
        bus.publish(Event::SseConnected {}).await;
        assert_eq!(*order.lock(), vec![1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = bus.subscribe(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(Event::SseConnected {}).await;
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(Event::SseConnected {}).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_during_publish_is_safe() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        // The first subscriber drops its own handle mid-publish by moving
        // it into a slot the callback clears.
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_cb = slot.clone();
        let h = hits.clone();
        let sub = bus.subscribe(move |_| {
            let slot = slot_in_cb.clone();
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                slot.lock().take();
            }
        });
        *slot.lock() = Some(sub);

        bus.publish(Event::SseConnected {}).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);

        // Second publish reaches nobody.
        bus.publish(Event::SseConnected {}).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
