use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use super::store::{SessionSnapshot, SharedSessionStore};
use super::{SessionAction, SessionPhase, SessionState, TransitionError};
use crate::imaging::{CodecError, CropRect, EditableImage};
use crate::pipeline::instruction::SelectionArea;
use crate::pipeline::orchestrator::{EditError, EditOrchestrator, EditRequest};
use crate::pipeline::service::{DetectedElement, TransportError};

#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("the session changed while the request was in flight")]
    Superseded,
    #[error("editor task failed: {0}")]
    Task(String),
}

impl From<EditError> for EditorError {
    fn from(error: EditError) -> Self {
        match error {
            EditError::Validation(error) => Self::Transition(TransitionError::Validation(error)),
            EditError::Transport(error) => Self::Transport(error),
            EditError::Task(message) => Self::Task(message),
        }
    }
}

/// Read model handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub generation: u64,
    pub is_analyzing: bool,
    pub is_editing: bool,
    pub is_enhancing: bool,
    pub original: Option<EditableImage>,
    pub edited: Option<EditableImage>,
    pub removed_layer: Option<EditableImage>,
    pub replacement: Option<EditableImage>,
    pub detected_elements: Vec<DetectedElement>,
    pub selected_elements: Vec<String>,
    pub area: Option<SelectionArea>,
    pub custom_instruction: String,
    pub error: Option<String>,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            phase: state.phase,
            generation: state.generation,
            is_analyzing: state.is_analyzing(),
            is_editing: state.is_editing(),
            is_enhancing: state.is_enhancing(),
            original: state.original.clone(),
            edited: state.edited.clone(),
            removed_layer: state.removed_layer.clone(),
            replacement: state.replacement.clone(),
            detected_elements: state.detected_elements.clone(),
            selected_elements: state.selection.selected_elements.clone(),
            area: state.selection.area,
            custom_instruction: state.selection.custom_instruction.clone(),
            error: state.error.clone(),
        }
    }
}

/// Owns the session state. Every mutation goes through
/// [`SessionState::reduce`]; the lock is never held across an await, and
/// results are committed only if the generation they were issued against is
/// still current.
pub struct EditorSession {
    state: Mutex<Tracked>,
    /// Revision of the last state handed to the store.
    persisted: AsyncMutex<u64>,
    orchestrator: EditOrchestrator,
    store: SharedSessionStore,
}

/// Session state plus a revision bumped on every applied transition.
#[derive(Default)]
struct Tracked {
    state: SessionState,
    revision: u64,
}

impl EditorSession {
    pub fn new(orchestrator: EditOrchestrator, store: SharedSessionStore) -> Self {
        Self {
            state: Mutex::new(Tracked::default()),
            persisted: AsyncMutex::new(0),
            orchestrator,
            store,
        }
    }

    /// Loads the persisted snapshot, if any. Returns whether one was applied.
    pub async fn restore(&self) -> Result<bool, EditorError> {
        let store = self.store.clone();
        let snapshot = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| EditorError::Task(e.to_string()))?;
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        self.dispatch(SessionAction::Restore(snapshot))?;
        info!("restored persisted session snapshot");
        Ok(true)
    }

    pub fn view(&self) -> SessionView {
        SessionView::from(&self.lock().state)
    }

    pub async fn upload_image(&self, image: EditableImage) -> Result<SessionView, EditorError> {
        self.ensure_decodable(image.clone()).await?;
        let state = self.dispatch(SessionAction::UploadImage(image))?;
        self.persist().await;
        self.run_analysis(state).await
    }

    pub async fn begin_crop(&self) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::BeginCrop).await
    }

    pub async fn cancel_crop(&self) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::CancelCrop).await
    }

    /// Crops the current original in natural pixel space and analyzes the
    /// result as a new base image.
    pub async fn complete_crop(&self, rect: CropRect) -> Result<SessionView, EditorError> {
        let original = {
            let tracked = self.lock();
            let state = &tracked.state;
            if state.phase != SessionPhase::Cropping {
                return Err(TransitionError::NotAllowed {
                    action: "complete_crop",
                    phase: state.phase,
                }
                .into());
            }
            state.original.clone().ok_or(TransitionError::NoImage)?
        };
        let codec = self.orchestrator.codec();
        let cropped = tokio::task::spawn_blocking(move || codec.crop(&original, rect))
            .await
            .map_err(|e| EditorError::Task(e.to_string()))??;
        let state = self.dispatch(SessionAction::CompleteCrop(cropped))?;
        self.persist().await;
        self.run_analysis(state).await
    }

    pub async fn begin_area_selection(&self) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::BeginAreaSelection).await
    }

    pub async fn cancel_area_selection(&self) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::CancelAreaSelection).await
    }

    pub async fn set_area(&self, area: Option<SelectionArea>) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::SetArea(area)).await
    }

    pub async fn toggle_element(&self, name: String) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::ToggleElement(name)).await
    }

    pub async fn set_custom_instruction(&self, text: String) -> Result<SessionView, EditorError> {
        self.apply(SessionAction::SetCustomInstruction(text)).await
    }

    pub async fn set_replacement(
        &self,
        image: Option<EditableImage>,
    ) -> Result<SessionView, EditorError> {
        if let Some(image) = image.as_ref() {
            self.ensure_decodable(image.clone()).await?;
        }
        self.apply(SessionAction::SetReplacement(image)).await
    }

    pub async fn apply_edit(&self) -> Result<SessionView, EditorError> {
        let state = self.dispatch(SessionAction::BeginEdit)?;
        let generation = state.generation;
        let request = EditRequest {
            image: state.original.clone().ok_or(TransitionError::NoImage)?,
            selection: state.selection.clone(),
            replacement: state.replacement.clone(),
        };
        match self.orchestrator.apply_edit(request).await {
            Ok(outcome) => {
                let has_layer = outcome.removed_layer.is_some();
                let state = self.commit(SessionAction::EditSucceeded {
                    generation,
                    outcome,
                })?;
                info!(generation, has_layer, "edit committed");
                self.persist().await;
                Ok(SessionView::from(&state))
            }
            Err(error) => {
                let error = EditorError::from(error);
                self.commit(SessionAction::EditFailed {
                    generation,
                    message: error.to_string(),
                })?;
                self.persist().await;
                Err(error)
            }
        }
    }

    pub async fn auto_enhance(&self) -> Result<SessionView, EditorError> {
        let state = self.dispatch(SessionAction::BeginEnhance)?;
        let generation = state.generation;
        let image = state.original.clone().ok_or(TransitionError::NoImage)?;
        match self.orchestrator.auto_enhance(image).await {
            Ok(edited) => {
                let state = self.commit(SessionAction::EnhanceSucceeded { generation, edited })?;
                info!(generation, "enhance committed");
                self.persist().await;
                Ok(SessionView::from(&state))
            }
            Err(error) => {
                let error = EditorError::from(error);
                self.commit(SessionAction::EnhanceFailed {
                    generation,
                    message: error.to_string(),
                })?;
                self.persist().await;
                Err(error)
            }
        }
    }

    pub async fn reset(&self) -> Result<SessionView, EditorError> {
        let state = self.dispatch(SessionAction::Reset)?;
        self.persist().await;
        info!(generation = state.generation, "session reset");
        Ok(SessionView::from(&state))
    }

    async fn run_analysis(&self, state: SessionState) -> Result<SessionView, EditorError> {
        let generation = state.generation;
        let image = state.original.ok_or(TransitionError::NoImage)?;
        match self.orchestrator.analyze_elements(image).await {
            Ok(elements) => {
                let state = self.commit(SessionAction::AnalysisSucceeded {
                    generation,
                    elements,
                })?;
                self.persist().await;
                Ok(SessionView::from(&state))
            }
            Err(error) => {
                let error = EditorError::from(error);
                self.commit(SessionAction::AnalysisFailed {
                    generation,
                    message: error.to_string(),
                })?;
                self.persist().await;
                Err(error)
            }
        }
    }

    async fn apply(&self, action: SessionAction) -> Result<SessionView, EditorError> {
        let state = self.dispatch(action)?;
        self.persist().await;
        Ok(SessionView::from(&state))
    }

    async fn ensure_decodable(&self, image: EditableImage) -> Result<(), EditorError> {
        let codec = self.orchestrator.codec();
        tokio::task::spawn_blocking(move || codec.dimensions(&image))
            .await
            .map_err(|e| EditorError::Task(e.to_string()))??;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, action: SessionAction) -> Result<SessionState, TransitionError> {
        let mut guard = self.lock();
        let next = guard.state.reduce(action)?;
        guard.state = next.clone();
        guard.revision += 1;
        Ok(next)
    }

    /// Applies a completion; a stale one is dropped and reported as superseded.
    fn commit(&self, action: SessionAction) -> Result<SessionState, EditorError> {
        let name = action.name();
        match self.dispatch(action) {
            Ok(state) => Ok(state),
            Err(TransitionError::Stale { issued, current }) => {
                warn!(
                    action = name,
                    issued, current, "discarding result for a superseded session"
                );
                Err(EditorError::Superseded)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Writes the latest state to the store. Writes are serialized and never
    /// go backwards: a save that finishes late cannot overwrite a newer state,
    /// including the cleared one left by a reset. States mid-analysis are not
    /// written, so the previous snapshot stays until the elements are known.
    async fn persist(&self) {
        let mut written = self.persisted.lock().await;
        let (snapshot, revision) = {
            let guard = self.lock();
            if guard.state.is_analyzing() || guard.revision <= *written {
                return;
            }
            (SessionSnapshot::from_state(&guard.state), guard.revision)
        };
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || {
            if snapshot.is_empty() {
                store.clear()
            } else {
                store.save(&snapshot)
            }
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(error = %error, "session snapshot save failed"),
            Err(join_error) => warn!(error = %join_error, "session snapshot save task failed"),
        }
        *written = revision;
    }
}
