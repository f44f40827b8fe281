use crate::types::Context;
use axum::{
    async_trait,
    extract::{Extension, FromRequestParts},
    http::{
        header::{HeaderName, HeaderValue},
        request::Parts,
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json, RequestPartsExt,
};
use axum_extra::TypedHeader;
use headers::{Error, Header};
use serde_json::json;
use std::{iter, sync::Arc};

pub static X_AUTOCOMPLETE_KEY: HeaderName = HeaderName::from_static("x-autocomplete-key");

#[derive(Clone, Debug)]
pub struct AutocompleteKey(pub String);

impl Header for AutocompleteKey {
    fn name() -> &'static HeaderName {
        &X_AUTOCOMPLETE_KEY
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        values
            .next()
            .and_then(|value| value.to_str().ok())
            .map(|value| Self(value.to_string()))
            .ok_or(Error::invalid())
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(iter::once(value));
        }
    }
}

/// Only the page renderer holding the internal key may register widgets.
pub struct InternalAuth;

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for InternalAuth {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(ctx) = parts
            .extract::<Extension<Arc<Context>>>()
            .await
            .map_err(|err| {
                tracing::error!("Context missing from request extensions: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })?;

        let err = (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid internal key" })),
        );

        let expected = ctx
            .autocomplete
            .internal_key
            .as_deref()
            .ok_or_else(|| err.clone().into_response())?;

        let TypedHeader(AutocompleteKey(key)) = parts
            .extract::<TypedHeader<AutocompleteKey>>()
            .await
            .map_err(|_| err.clone().into_response())?;

        if !ctx.signer.secrets_match(&key, expected) {
            return Err(err.into_response());
        }

        Ok(Self)
    }
}
