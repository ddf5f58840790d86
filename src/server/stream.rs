//! Server-sent event stream of container status and metrics changes.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::api::{ApiError, SharedState};
use crate::errors::HostingError;
use crate::models::StreamEvent;
use crate::reconcile;

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const SESSION_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
}

fn to_sse(event: StreamEvent) -> Result<Event, Infallible> {
    Ok(Event::default()
        .event(event.event_type())
        .data(event.data().to_string()))
}

/// `GET /containers/events?token=`: open a reconciliation session.
///
/// The session task ends when the client disconnects and the receiving
/// side of its channel is dropped, or when the server shuts down, which
/// drops the sending side and ends the stream.
pub async fn events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let token = query.token.unwrap_or_default();
    if token.is_empty() {
        return Err(HostingError::Unauthorized("missing token".into()).into());
    }
    let principal = state.auth.authenticate(&token).await?;

    let (tx, rx) = mpsc::channel(SESSION_BUFFER);
    let hosting = &state.hosting;
    let owner = principal.owner.clone();
    let session = reconcile::run_session(
        hosting.reconcile.clone(),
        hosting.reconciler.clone(),
        principal,
        hosting.refresh.subscribe(),
        tx,
    );
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = session => {}
            _ = shutdown.cancelled() => {
                tracing::debug!(owner = %owner, "Session ended by server shutdown");
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(to_sse);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}
