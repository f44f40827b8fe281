mod auto_response;
mod register;

use crate::types::Context;
use axum::routing::Router;
use std::sync::Arc;

pub fn get_router() -> Router<Arc<Context>> {
    Router::new()
        .merge(auto_response::get_router())
        .merge(register::get_router())
}
