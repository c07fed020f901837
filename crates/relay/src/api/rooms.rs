use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    routing::get,
    Json, Router,
};
use huddle_common::room::RoomId;
use serde_json::json;
use tracing::debug;

use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, RelayError};
use crate::room::{CollaborationRegistry, RoomSummary};

pub(super) fn router(registry: Arc<CollaborationRegistry>) -> Router {
    Router::new().route("/v1/rooms/{room_id}", get(get_room)).with_state(registry)
}

async fn get_room(
    State(registry): State<Arc<CollaborationRegistry>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(raw_room_id): Path<String>,
) -> Result<Json<RoomSummary>, RelayError> {
    let room_id = RoomId::parse(&raw_room_id).map_err(|error| {
        RelayError::new(ErrorCode::ValidationFailed, error.to_string())
            .with_details(json!({ "field": "room_id" }))
    })?;

    debug!(user_id = %user.identity.id, room_id = %room_id, "room summary requested");

    registry
        .room_summary(&room_id)
        .await
        .map(Json)
        .ok_or_else(|| RelayError::new(ErrorCode::NotFound, format!("room `{room_id}` not found")))
}
