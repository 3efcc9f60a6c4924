use axum::http::StatusCode;
use serde::Serialize;

use crate::pipeline::service::TransportErrorKind;
use crate::session::editor::EditorError;
use crate::session::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Infra,
    Policy,
    Unknown,
}

/// How an editor failure surfaces over HTTP. `internal` failures are logged
/// and their message replaced before leaving the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub internal: bool,
}

impl ApiFailure {
    fn new(status: StatusCode, kind: ErrorKind, code: &'static str, message: String) -> Self {
        Self {
            status,
            kind,
            code,
            message,
            internal: false,
        }
    }
}

pub fn classify_editor_error(error: &EditorError) -> ApiFailure {
    match error {
        EditorError::Transition(transition) => classify_transition_error(transition),
        EditorError::Codec(codec) => ApiFailure::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "invalid_image",
            codec.to_string(),
        ),
        EditorError::Transport(transport) => {
            let (status, kind) = match transport.kind {
                TransportErrorKind::RateLimited => {
                    (StatusCode::TOO_MANY_REQUESTS, ErrorKind::Provider)
                }
                TransportErrorKind::ServerOverloaded => {
                    (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Provider)
                }
                TransportErrorKind::ContentPolicyBlocked
                | TransportErrorKind::RecitationBlocked => {
                    (StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::Policy)
                }
                TransportErrorKind::PermissionDenied
                | TransportErrorKind::MalformedRequest
                | TransportErrorKind::Other => (StatusCode::BAD_GATEWAY, ErrorKind::Provider),
            };
            ApiFailure::new(status, kind, transport.kind.as_str(), transport.message())
        }
        EditorError::Superseded => ApiFailure::new(
            StatusCode::CONFLICT,
            ErrorKind::Validation,
            "superseded",
            error.to_string(),
        ),
        EditorError::Task(message) => ApiFailure {
            internal: true,
            ..ApiFailure::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "internal_error",
                message.clone(),
            )
        },
    }
}

fn classify_transition_error(error: &TransitionError) -> ApiFailure {
    let (status, code) = match error {
        TransitionError::NotAllowed { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        TransitionError::NoImage => (StatusCode::CONFLICT, "no_image"),
        TransitionError::Stale { .. } => (StatusCode::CONFLICT, "superseded"),
        TransitionError::UnknownElement(_) => (StatusCode::BAD_REQUEST, "unknown_element"),
        TransitionError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
    };
    ApiFailure::new(status, ErrorKind::Validation, code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::instruction::ValidationError;
    use crate::pipeline::service::TransportError;
    use crate::session::SessionPhase;

    fn transport(kind: TransportErrorKind) -> EditorError {
        EditorError::Transport(TransportError {
            kind,
            detail: String::from("upstream detail"),
        })
    }

    #[test]
    fn transport_kinds_map_to_distinct_statuses() {
        use TransportErrorKind as K;
        let cases = [
            (K::RateLimited, StatusCode::TOO_MANY_REQUESTS, ErrorKind::Provider),
            (K::ServerOverloaded, StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Provider),
            (K::ContentPolicyBlocked, StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::Policy),
            (K::RecitationBlocked, StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::Policy),
            (K::PermissionDenied, StatusCode::BAD_GATEWAY, ErrorKind::Provider),
        ];
        for (kind, status, error_kind) in cases {
            let failure = classify_editor_error(&transport(kind));
            assert_eq!(failure.status, status, "{kind:?}");
            assert_eq!(failure.kind, error_kind, "{kind:?}");
            assert_eq!(failure.code, kind.as_str());
            assert!(!failure.message.contains("upstream detail"));
        }
    }

    #[test]
    fn transitions_are_conflicts_and_validation_is_bad_request() {
        let conflict = classify_editor_error(&EditorError::Transition(TransitionError::NotAllowed {
            action: "begin_edit",
            phase: SessionPhase::Editing,
        }));
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.code, "invalid_transition");

        let invalid = classify_editor_error(&EditorError::Transition(
            TransitionError::Validation(ValidationError::NothingSelected),
        ));
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.kind, ErrorKind::Validation);
    }

    #[test]
    fn task_failures_are_internal() {
        let failure = classify_editor_error(&EditorError::Task(String::from("join error")));
        assert!(failure.internal);
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
