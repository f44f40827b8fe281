use super::service::service;
use super::types::request;
use crate::{modules::autocomplete::middleware::InternalAuth, types::Context};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use std::sync::Arc;

pub async fn handler(
    _: InternalAuth,
    State(ctx): State<Arc<Context>>,
    Json(config): Json<request::Json>,
) -> impl IntoResponse {
    service(ctx, request::Payload { config }).await
}
