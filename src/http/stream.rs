use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use uuid::Uuid;

use crate::app::communities::CommunityService;
use crate::app::realtime::{RealtimeBridge, StoredRecords};
use crate::domain::realtime::Topic;
use crate::http::{AppError, AuthUser};
use crate::AppState;

const KEEP_ALIVE_SECONDS: u64 = 15;

fn communities(state: &AppState) -> CommunityService {
    CommunityService::new(
        state.db.clone(),
        state.cache.clone(),
        state.feed.membership_cache_ttl_seconds,
    )
}

async fn ensure_member(
    service: &CommunityService,
    user_id: Uuid,
    community_id: Uuid,
) -> Result<(), AppError> {
    let is_member = service
        .is_member(user_id, community_id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to check membership"))?;
    if !is_member {
        return Err(AppError::forbidden("not a member of this community"));
    }
    Ok(())
}

/// Live inserts for `topic` as server-sent events, one event per item
/// named after its kind.
async fn live_events(
    state: &AppState,
    topic: Topic,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let bridge = RealtimeBridge::new(state.realtime.clone(), StoredRecords::new(state.db.clone()));
    let subscription = bridge.subscribe(topic);

    let events = stream::unfold(subscription, |mut subscription| async move {
        let item = subscription.next().await?;
        let event = match Event::default().event(item.kind()).json_data(&item) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = ?err, topic = %subscription.topic(), "failed to encode live item");
                Event::default().comment("dropped item")
            }
        };
        Some((Ok(event), subscription))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECONDS)))
}

pub async fn channel_stream(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let service = communities(&state);
    let community_id = service
        .channel_community(id)
        .await
        .map_err(|err| AppError::from_service(err, "failed to open channel stream"))?
        .ok_or_else(|| AppError::not_found("channel not found"))?;
    ensure_member(&service, auth.user_id, community_id).await?;

    tracing::debug!(channel_id = %id, user_id = %auth.user_id, "opening channel stream");
    Ok(live_events(&state, Topic::Channel(id)).await)
}

pub async fn community_stream(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    ensure_member(&communities(&state), auth.user_id, id).await?;

    tracing::debug!(community_id = %id, user_id = %auth.user_id, "opening community stream");
    Ok(live_events(&state, Topic::Community(id)).await)
}
