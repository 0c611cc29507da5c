//! WebSocket bridge from the event bus to clients.
//!
//! On connect the current snapshot goes out first, then live events from
//! the topic subscription. A client that cannot keep up sees the lag
//! marker once and is disconnected; the bus has already dropped the
//! oldest events for it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::events::{job_topic, workflow_topic, Event, Subscription};
use crate::registry::job_registry::job_event;
use crate::registry::workflow_registry::workflow_event;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

/// GET /v1/ws/workflows/{workflow_id}
pub async fn workflow_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Response> {
    // Subscribe before snapshotting so no event falls in the gap.
    let subscription = state.system.bus().subscribe(&workflow_topic(workflow_id));
    let workflow = state
        .system
        .workflows()
        .get(workflow_id)
        .ok_or(ApiError::NotFound)?;
    let snapshot = workflow_event(&workflow);

    Ok(ws.on_upgrade(move |socket| stream_events(socket, subscription, snapshot)))
}

/// GET /v1/ws/jobs/{job_id}
pub async fn job_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let subscription = state.system.bus().subscribe(&job_topic(job_id));
    let job = state.system.jobs().get(job_id).ok_or(ApiError::NotFound)?;
    let snapshot = job_event(&job);

    Ok(ws.on_upgrade(move |socket| stream_events(socket, subscription, snapshot)))
}

async fn stream_events(socket: WebSocket, mut subscription: Subscription, snapshot: Event) {
    let (mut sink, mut stream) = socket.split();

    if send_event(&mut sink, &snapshot).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(Event::Lagged { missed }) => {
                    warn!(
                        topic = %subscription.topic(),
                        missed,
                        "Subscriber too slow, dropping connection"
                    );
                    let _ = send_event(&mut sink, &Event::Lagged { missed }).await;
                    break;
                }
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        debug!(topic = %subscription.topic(), "WebSocket sink closed");
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // Pings and client chatter keep the connection alive.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(e) => {
            error!(error = %e, "Event serialization failed");
            Ok(())
        }
    }
}
