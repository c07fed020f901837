// Authenticated HTTP read API.

mod rooms;

use std::sync::Arc;

use axum::{middleware, Router};

use crate::auth::{identity::IdentityResolver, middleware::require_bearer_auth};
use crate::room::CollaborationRegistry;

pub fn router(
    registry: Arc<CollaborationRegistry>,
    resolver: Arc<dyn IdentityResolver>,
) -> Router {
    rooms::router(registry)
        .route_layer(middleware::from_fn_with_state(resolver, require_bearer_auth))
}
