use super::service::service;
use super::types::request;
use crate::types::Context;
use axum::{
    extract::{OriginalUri, State},
    response::IntoResponse,
};
use std::sync::Arc;

pub async fn handler(
    State(ctx): State<Arc<Context>>,
    OriginalUri(uri): OriginalUri,
    params: request::QueryParams,
) -> impl IntoResponse {
    service(
        ctx,
        request::Payload {
            path: uri.path().to_string(),
            params,
        },
    )
    .await
}
