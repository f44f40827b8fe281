pub mod request {
    pub use crate::modules::autocomplete::query::QueryParams;

    pub struct Payload {
        pub path: String,
        pub params: QueryParams,
    }
}

pub mod response {
    use crate::{modules::autocomplete::widget, utils::pagination::Paginated};
    use axum::{extract::Json, http::StatusCode, response::IntoResponse};
    use serde_json::{json, Value};

    pub enum Success {
        Results(Paginated<Value>),
    }

    impl IntoResponse for Success {
        fn into_response(self) -> axum::response::Response {
            match self {
                Self::Results(results) => (StatusCode::OK, Json(json!(results))).into_response(),
            }
        }
    }

    pub enum Error {
        MissingFieldId,
        InvalidFieldId,
        FieldNotFound,
        WrongUrl,
        UnknownWidget,
        InvalidPage,
        FailedToFetchResults,
    }

    impl From<widget::Error> for Error {
        fn from(err: widget::Error) -> Self {
            match err {
                widget::Error::MissingFieldId => Self::MissingFieldId,
                widget::Error::InvalidFieldId => Self::InvalidFieldId,
                widget::Error::WrongUrl => Self::WrongUrl,
                widget::Error::UnknownKind(kind) => {
                    tracing::error!("No widget kind registered as {}", kind);
                    Self::UnknownWidget
                }
                widget::Error::NotFound
                | widget::Error::InvalidConfig(_)
                | widget::Error::UnexpectedError => Self::FieldNotFound,
            }
        }
    }

    impl IntoResponse for Error {
        fn into_response(self) -> axum::response::Response {
            let message = match self {
                Self::MissingFieldId => "No \"field_id\" provided.",
                Self::InvalidFieldId => "Invalid \"field_id\".",
                Self::FieldNotFound => "field_id not found",
                Self::WrongUrl => "field_id was issued for another view",
                Self::UnknownWidget => "field_id not found",
                Self::InvalidPage => "Invalid page",
                Self::FailedToFetchResults => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "Failed to fetch results" })),
                    )
                        .into_response()
                }
            };

            (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
        }
    }

    pub type Response = Result<Success, Error>;
}
