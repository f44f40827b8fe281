pub mod request {
    use crate::modules::autocomplete::widget::WidgetConfig;

    pub type Json = WidgetConfig;

    pub struct Payload {
        pub config: Json,
    }
}

pub mod response {
    use crate::{modules::autocomplete::widget, utils::validation};
    use axum::{extract::Json, http::StatusCode, response::IntoResponse};
    use serde_json::json;
    use validator::ValidationErrors;

    pub enum Success {
        Registered(String),
    }

    impl IntoResponse for Success {
        fn into_response(self) -> axum::response::Response {
            match self {
                Self::Registered(field_id) => (
                    StatusCode::CREATED,
                    Json(json!({ "field_id": field_id })),
                )
                    .into_response(),
            }
        }
    }

    pub enum Error {
        ValidationFailed(ValidationErrors),
        InvalidConfig(String),
        UnknownWidget(String),
        FailedToRegister,
    }

    impl From<widget::Error> for Error {
        fn from(err: widget::Error) -> Self {
            match err {
                widget::Error::InvalidConfig(reason) => Self::InvalidConfig(reason),
                widget::Error::UnknownKind(kind) => Self::UnknownWidget(kind),
                _ => Self::FailedToRegister,
            }
        }
    }

    impl IntoResponse for Error {
        fn into_response(self) -> axum::response::Response {
            match self {
                Self::ValidationFailed(errors) => validation::into_response(errors).into_response(),
                Self::InvalidConfig(reason) => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid widget config: {}", reason) })),
                )
                    .into_response(),
                Self::UnknownWidget(kind) => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Unknown widget kind: {}", kind) })),
                )
                    .into_response(),
                Self::FailedToRegister => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Failed to register widget" })),
                )
                    .into_response(),
            }
        }
    }

    pub type Response = Result<Success, Error>;
}
