use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/functions/{function_id}/stream", get(stream_function))
}

/// One SSE subscription per function. Events for other functions are
/// dropped here, before anything leaves the process, so the fan-out
/// per client is bounded by the function they are actually watching.
async fn stream_function(
    State(state): State<AppState>,
    Path(function_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.locks.feed().subscribe();

    let stream = BroadcastStream::new(rx)
        .take_while(|result| {
            // A lagged receiver has missed events it can never get
            // back. Ending the stream forces the EventSource to
            // reconnect and re-seed from the lock list instead of
            // silently serving stale state.
            let live = !matches!(result, Err(BroadcastStreamRecvError::Lagged(_)));
            async move { live }
        })
        .filter_map(move |result| async move {
            match result {
                Ok(event) if event.function_id() == function_id => {
                    let data = serde_json::to_string(&event).ok()?;
                    Some(Ok::<_, Infallible>(
                        Event::default().event(event.kind.as_str()).data(data),
                    ))
                }
                _ => None,
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
