//! Chat frames as a server-sent event stream.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::models::ChatFrame;

/// Wrap `frames` as an SSE response body.
///
/// `cancel` fires when the body is dropped, which is how a client
/// disconnect reaches the chat turn.
pub fn frame_stream(
    frames: mpsc::Receiver<ChatFrame>,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let guard = cancel.drop_guard();
    let events = ReceiverStream::new(frames).map(move |frame| {
        let _alive = &guard;
        Ok::<_, Infallible>(to_event(&frame))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(frame: &ChatFrame) -> Event {
    Event::default().json_data(frame).unwrap_or_else(|e| {
        Event::default().data(json!({ "type": "error", "content": e.to_string() }).to_string())
    })
}
