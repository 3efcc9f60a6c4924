use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::instruction::{
    compose_edit_instruction, extraction_subject, SelectionSpec, ValidationError,
};
use super::service::{
    DetectedElement, ServiceError, SharedGenerativeEditService, TransportError,
};
use crate::imaging::chroma_key::{chroma_key_or_original, DEFAULT_KEYING_TIMEOUT};
use crate::imaging::{EditableImage, SharedImageCodec};

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub image: EditableImage,
    pub selection: SelectionSpec,
    pub replacement: Option<EditableImage>,
}

/// Primary edit plus the best-effort transparent layer, committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub edited: EditableImage,
    pub removed_layer: Option<EditableImage>,
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("edit task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("nothing to extract")]
    NoSubject,
    #[error("extraction request failed: {0}")]
    Service(#[source] ServiceError),
    #[error("extraction task failed: {0}")]
    Task(String),
}

#[derive(Clone)]
pub struct EditOrchestrator {
    service: SharedGenerativeEditService,
    codec: SharedImageCodec,
    keying_timeout: Duration,
}

impl EditOrchestrator {
    pub fn new(service: SharedGenerativeEditService, codec: SharedImageCodec) -> Self {
        Self {
            service,
            codec,
            keying_timeout: DEFAULT_KEYING_TIMEOUT,
        }
    }

    pub fn with_keying_timeout(mut self, keying_timeout: Duration) -> Self {
        self.keying_timeout = keying_timeout;
        self
    }

    pub fn codec(&self) -> SharedImageCodec {
        self.codec.clone()
    }

    pub async fn analyze_elements(
        &self,
        image: EditableImage,
    ) -> Result<Vec<DetectedElement>, EditError> {
        let service = self.service.clone();
        let elements = tokio::task::spawn_blocking(move || service.analyze(&image))
            .await
            .map_err(|e| EditError::Task(e.to_string()))?
            .map_err(TransportError::from)?;
        info!(count = elements.len(), "analyzed thumbnail elements");
        Ok(elements)
    }

    /// Validates before any network call, then runs the edit and the layer
    /// extraction concurrently. Only the edit can fail the operation.
    pub async fn apply_edit(&self, request: EditRequest) -> Result<EditOutcome, EditError> {
        let EditRequest {
            image,
            selection,
            replacement,
        } = request;
        let instruction = compose_edit_instruction(&selection, replacement.is_some())?;
        let subject = extraction_subject(&selection);
        let request_id = Uuid::new_v4();
        info!(%request_id, instruction = %instruction, "applying edit");

        let service = self.service.clone();
        let edit_image = image.clone();
        let edit_task = tokio::task::spawn_blocking(move || {
            service.edit(&edit_image, instruction.as_str(), replacement.as_ref())
        });
        let (edited, removed_layer) = tokio::join!(edit_task, self.extract_layer(image, subject));

        let edited = edited
            .map_err(|e| EditError::Task(e.to_string()))?
            .map_err(TransportError::from)?;
        let removed_layer = match removed_layer {
            Ok(layer) => Some(layer),
            Err(ExtractionError::NoSubject) => None,
            Err(error) => {
                warn!(%request_id, error = %error, "removed-layer extraction failed; continuing without it");
                None
            }
        };
        Ok(EditOutcome {
            edited,
            removed_layer,
        })
    }

    pub async fn auto_enhance(&self, image: EditableImage) -> Result<EditableImage, EditError> {
        let service = self.service.clone();
        let edited = tokio::task::spawn_blocking(move || service.enhance(&image))
            .await
            .map_err(|e| EditError::Task(e.to_string()))?
            .map_err(TransportError::from)?;
        Ok(edited)
    }

    async fn extract_layer(
        &self,
        image: EditableImage,
        subject: Option<String>,
    ) -> Result<EditableImage, ExtractionError> {
        let subject = subject.ok_or(ExtractionError::NoSubject)?;
        let service = self.service.clone();
        let green_screen =
            tokio::task::spawn_blocking(move || service.extract(&image, subject.as_str()))
                .await
                .map_err(|e| ExtractionError::Task(e.to_string()))?
                .map_err(ExtractionError::Service)?;
        Ok(chroma_key_or_original(self.codec.clone(), green_screen, self.keying_timeout).await)
    }
}
