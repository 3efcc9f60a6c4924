use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::imaging::EditableImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Character,
    Object,
    Background,
    Text,
    Mob,
    Ui,
    Logo,
}

impl ElementKind {
    pub const ALL: [Self; 7] = [
        Self::Character,
        Self::Object,
        Self::Background,
        Self::Text,
        Self::Mob,
        Self::Ui,
        Self::Logo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Object => "object",
            Self::Background => "background",
            Self::Text => "text",
            Self::Mob => "mob",
            Self::Ui => "ui",
            Self::Logo => "logo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedElement {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
}

/// Multimodal model operations the editor depends on. Calls block; callers
/// run them on the blocking pool.
pub trait GenerativeEditService: Send + Sync + 'static {
    fn analyze(&self, image: &EditableImage) -> Result<Vec<DetectedElement>, ServiceError>;
    fn edit(
        &self,
        image: &EditableImage,
        instruction: &str,
        replacement: Option<&EditableImage>,
    ) -> Result<EditableImage, ServiceError>;
    /// Returns the described elements on a solid #00FF00 background.
    fn extract(&self, image: &EditableImage, subject: &str) -> Result<EditableImage, ServiceError>;
    fn enhance(&self, image: &EditableImage) -> Result<EditableImage, ServiceError>;
}

pub type SharedGenerativeEditService = Arc<dyn GenerativeEditService>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing API key: set GEMINI_API_KEY in environment or .env")]
    MissingApiKey,
    #[error("http client init failed: {0}")]
    ClientInit(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("model returned no image payload")]
    NoImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    RateLimited,
    PermissionDenied,
    MalformedRequest,
    ServerOverloaded,
    ContentPolicyBlocked,
    RecitationBlocked,
    Other,
}

impl TransportErrorKind {
    // Content blocks first: their text can also carry an HTTP status.
    const MARKERS: [(Self, &'static [&'static str]); 6] = [
        (Self::RecitationBlocked, &["RECITATION"]),
        (
            Self::ContentPolicyBlocked,
            &["response blocked:", "SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST"],
        ),
        (
            Self::RateLimited,
            &["HTTP 429", "RESOURCE_EXHAUSTED", "quota", "rate limit"],
        ),
        (
            Self::PermissionDenied,
            &["HTTP 401", "HTTP 403", "PERMISSION_DENIED", "API key"],
        ),
        (
            Self::ServerOverloaded,
            &["HTTP 500", "HTTP 503", "UNAVAILABLE", "overloaded"],
        ),
        (Self::MalformedRequest, &["HTTP 400", "INVALID_ARGUMENT"]),
    ];

    pub fn classify(text: &str) -> Self {
        Self::MARKERS
            .iter()
            .find(|(_, markers)| markers.iter().any(|m| text.contains(m)))
            .map(|(kind, _)| *kind)
            .unwrap_or(Self::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::PermissionDenied => "permission_denied",
            Self::MalformedRequest => "malformed_request",
            Self::ServerOverloaded => "server_overloaded",
            Self::ContentPolicyBlocked => "content_policy_blocked",
            Self::RecitationBlocked => "recitation_blocked",
            Self::Other => "provider_error",
        }
    }

    fn user_message(self) -> &'static str {
        match self {
            Self::RateLimited => {
                "The AI service is rate limiting requests. Wait a moment and try again."
            }
            Self::PermissionDenied => {
                "The AI service rejected the API key or its permissions. Check the configured key."
            }
            Self::MalformedRequest => {
                "The AI service could not process this request. Try a different image or instruction."
            }
            Self::ServerOverloaded => "The AI service is overloaded right now. Try again shortly.",
            Self::ContentPolicyBlocked => {
                "The request was blocked by the AI service's content policy. Adjust the image or instruction."
            }
            Self::RecitationBlocked => {
                "The AI service declined to reproduce protected content. Rephrase the instruction."
            }
            Self::Other => "The AI service request failed.",
        }
    }
}

/// Classified service failure with a user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn message(&self) -> String {
        match self.kind {
            TransportErrorKind::Other => {
                format!("{} {}", self.kind.user_message(), self.detail)
            }
            kind => kind.user_message().to_string(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message().as_str())
    }
}

impl std::error::Error for TransportError {}

impl From<ServiceError> for TransportError {
    fn from(error: ServiceError) -> Self {
        let detail = error.to_string();
        Self {
            kind: TransportErrorKind::classify(detail.as_str()),
            detail,
        }
    }
}
