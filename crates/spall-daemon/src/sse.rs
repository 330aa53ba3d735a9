//! SSE adapters over the event bus.
//!
//! Streaming operations never return events directly: they publish to
//! the bus, and each SSE response owns a private subscriber that
//! serializes events into the HTTP stream. Client disconnects mark the
//! operation's request context aborted; the pipeline notices at its
//! next checkpoint and unwinds with a cancellation the adapter
//! swallows.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::sse::{Event as SseEvent, Sse};
use futures::Stream;
use parking_lot::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use spall_core::{Event, RequestContext, Result, Subscription};

use crate::idle::CounterGuard;
use crate::AppHandle;

type SharedSubscription = Arc<Mutex<Option<Subscription>>>;

/// Stream wrapper that owns the per-stream resources. Dropping it (the
/// client went away) aborts the request context and releases the
/// subscription; the counter guard travels with whichever side is
/// responsible for cleanup.
pub struct EventStream {
    inner: ReceiverStream<Event>,
    subscription: SharedSubscription,
    ctx: Option<RequestContext>,
    _guard: Option<CounterGuard>,
}

impl Stream for EventStream {
    type Item = std::result::Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                    warn!("unserializable event: {e}");
                    "{}".to_string()
                });
                Poll::Ready(Some(Ok(SseEvent::default().data(data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(ctx) = &self.ctx {
            ctx.abort();
        }
        self.subscription.lock().take();
    }
}

/// Runs `op` inside a fresh request context while streaming every bus
/// event to the response. Cancellations are swallowed; other failures
/// are emitted as a single `error` event. The subscription and SSE
/// counter are released on every exit path.
pub fn stream_operation<F, Fut>(app: &AppHandle, op: F) -> Sse<EventStream>
where
    F: FnOnce(RequestContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);
    let ctx = RequestContext::new();
    let guard = app.idle.sse_guard();
    let subscription: SharedSubscription = Arc::new(Mutex::new(None));

    let sub_in_callback = subscription.clone();
    let abort_ctx = ctx.clone();
    let sub = app.bus.subscribe(move |event| {
        let tx = tx.clone();
        let sub = sub_in_callback.clone();
        let ctx = abort_ctx.clone();
        async move {
            if tx.send(event).await.is_err() {
                // Client gone: abort the operation and unsubscribe now.
                ctx.abort();
                sub.lock().take();
            }
        }
    });
    *subscription.lock() = Some(sub);

    let bus = app.bus.clone();
    let task_ctx = ctx.clone();
    let task_subscription = subscription.clone();
    tokio::spawn(async move {
        let _guard = guard;
        match op(task_ctx).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                bus.publish(Event::error(e.code(), e.to_string())).await;
            }
        }
        // Dropping the subscription drops the channel sender, which
        // ends the response stream.
        task_subscription.lock().take();
    });

    Sse::new(EventStream {
        inner: ReceiverStream::new(rx),
        subscription,
        ctx: Some(ctx),
        _guard: None,
    })
}

/// The global `/events` feed: an `sse.connected` marker, then every bus
/// event for the connection's lifetime.
pub async fn global_events(app: &AppHandle) -> Sse<EventStream> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);
    let guard = app.idle.sse_guard();
    let subscription: SharedSubscription = Arc::new(Mutex::new(None));

    let _ = tx.send(Event::SseConnected {}).await;

    let sub_in_callback = subscription.clone();
    let sub = app.bus.subscribe(move |event| {
        let tx = tx.clone();
        let sub = sub_in_callback.clone();
        async move {
            if tx.send(event).await.is_err() {
                sub.lock().take();
            }
        }
    });
    *subscription.lock() = Some(sub);

    Sse::new(EventStream {
        inner: ReceiverStream::new(rx),
        subscription,
        ctx: None,
        _guard: Some(guard),
    })
}
