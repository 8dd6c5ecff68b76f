//! Server-sent change stream for a single card.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::{self, Stream};
use sawt_core::CardId;

use crate::middleware::RequestId;

use super::{map_backend_error, ApiError, AppState};

const CHANGE_EVENT: &str = "change";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /api/v1/cards/{id}/events: one `change` event per update of the card.
///
/// The subscription is dropped, and its producer stopped, when the client
/// disconnects.
pub(super) async fn card_events(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let card_id = CardId::new(id);

    state
        .store
        .fetch_card(&card_id)
        .await
        .map_err(|e| map_backend_error(req_id.0.clone(), &e))?;

    let subscription = state
        .changes
        .subscribe(&card_id)
        .await
        .map_err(|e| map_backend_error(req_id.0.clone(), &e))?;
    tracing::debug!(card_id = %card_id, "change stream opened");

    let events = stream::unfold(subscription, |mut subscription| async move {
        let change = subscription.next().await?;
        let event = Event::default()
            .event(CHANGE_EVENT)
            .json_data(&change)
            .unwrap_or_else(|e| {
                tracing::warn!(card_id = %change.card_id, error = %e, "could not encode change");
                Event::default().comment("unencodable change")
            });
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
