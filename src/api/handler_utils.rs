use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::error::{classify_editor_error, ErrorKind};
use crate::session::editor::{EditorError, SessionView};

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SessionResponse<'a> {
    ok: bool,
    session: &'a SessionView,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: Some(kind),
            error_code: Some(code.into()),
        }),
    )
}

pub fn map_editor_error(error: EditorError) -> ApiObject<Value> {
    let failure = classify_editor_error(&error);
    if failure.internal {
        return internal_error(failure.message);
    }
    error_response(failure.status, failure.kind, failure.code, failure.message)
}

pub fn session_response(result: Result<SessionView, EditorError>) -> ApiObject<Value> {
    match result {
        Ok(view) => (
            StatusCode::OK,
            into_json(SessionResponse {
                ok: true,
                session: &view,
            }),
        ),
        Err(error) => map_editor_error(error),
    }
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::{internal_error, map_editor_error};
    use crate::pipeline::service::{TransportError, TransportErrorKind};
    use crate::session::editor::EditorError;

    #[test]
    fn rate_limits_carry_kind_and_code() {
        let (status, payload) = map_editor_error(EditorError::Transport(TransportError {
            kind: TransportErrorKind::RateLimited,
            detail: String::from("HTTP 429: RESOURCE_EXHAUSTED"),
        }));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(payload.0["ok"], json!(false));
        assert_eq!(payload.0["error_kind"], json!("provider"));
        assert_eq!(payload.0["error_code"], json!("rate_limited"));
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let (status, payload) = internal_error("sensitive detail");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload.0["ok"], json!(false));
        assert_eq!(payload.0["error"], json!("Internal server error"));
        assert_eq!(payload.0["error_kind"], json!("infra"));
        assert_eq!(payload.0["error_code"], json!("internal_error"));
    }

    #[test]
    fn task_failures_do_not_leak_detail() {
        let (status, payload) = map_editor_error(EditorError::Task(String::from("panic at x.rs")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload.0["error"], json!("Internal server error"));
    }
}
