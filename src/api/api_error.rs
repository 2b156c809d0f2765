use crate::error::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub(crate) struct APIError(anyhow::Error);

impl IntoResponse for APIError {
    fn into_response(self) -> Response {
        let any_err = self.0;
        if any_err.downcast_ref::<JsonRejection>().is_some() {
            // Malformed JSON bodies get a stable message rather than parser
            // internals.
            let body = Json(json!({"error": "Invalid request body"}));
            return (StatusCode::BAD_REQUEST, body).into_response();
        }
        let status = match any_err.downcast_ref::<Error>() {
            Some(Error::HookNotFound) => StatusCode::NOT_FOUND,
            Some(Error::EmptyBatch) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": format!("{any_err}"),
        }));
        (status, body).into_response()
    }
}

impl<E> From<E> for APIError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
