use super::types::{request, response};
use crate::{
    modules::autocomplete::{widget, AUTO_RESPONSE_PATH},
    types::Context,
};
use std::sync::Arc;
use validator::Validate;

pub async fn service(ctx: Arc<Context>, payload: request::Payload) -> response::Response {
    let mut config = payload.config;
    config.validate().map_err(response::Error::ValidationFailed)?;
    config.url = AUTO_RESPONSE_PATH.to_string();

    let field_id = widget::register(&ctx, config).await?;

    Ok(response::Success::Registered(field_id))
}
