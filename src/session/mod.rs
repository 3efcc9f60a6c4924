pub mod editor;
pub mod store;

use serde::Serialize;
use thiserror::Error;

use crate::imaging::EditableImage;
use crate::pipeline::instruction::{SelectionArea, SelectionSpec, ValidationError};
use crate::pipeline::orchestrator::EditOutcome;
use crate::pipeline::service::DetectedElement;
use store::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Empty,
    Analyzing,
    Ready,
    Cropping,
    SelectingArea,
    Editing,
    Enhancing,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Cropping => "cropping",
            Self::SelectingArea => "selecting_area",
            Self::Editing => "editing",
            Self::Enhancing => "enhancing",
        }
    }

    /// A network operation is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Analyzing | Self::Editing | Self::Enhancing)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum SessionAction {
    UploadImage(EditableImage),
    BeginCrop,
    CancelCrop,
    CompleteCrop(EditableImage),
    BeginAreaSelection,
    CancelAreaSelection,
    SetArea(Option<SelectionArea>),
    ToggleElement(String),
    SetCustomInstruction(String),
    SetReplacement(Option<EditableImage>),
    AnalysisSucceeded {
        generation: u64,
        elements: Vec<DetectedElement>,
    },
    AnalysisFailed {
        generation: u64,
        message: String,
    },
    BeginEdit,
    EditSucceeded {
        generation: u64,
        outcome: EditOutcome,
    },
    EditFailed {
        generation: u64,
        message: String,
    },
    BeginEnhance,
    EnhanceSucceeded {
        generation: u64,
        edited: EditableImage,
    },
    EnhanceFailed {
        generation: u64,
        message: String,
    },
    Restore(SessionSnapshot),
    Reset,
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UploadImage(_) => "upload_image",
            Self::BeginCrop => "begin_crop",
            Self::CancelCrop => "cancel_crop",
            Self::CompleteCrop(_) => "complete_crop",
            Self::BeginAreaSelection => "begin_area_selection",
            Self::CancelAreaSelection => "cancel_area_selection",
            Self::SetArea(_) => "set_area",
            Self::ToggleElement(_) => "toggle_element",
            Self::SetCustomInstruction(_) => "set_custom_instruction",
            Self::SetReplacement(_) => "set_replacement",
            Self::AnalysisSucceeded { .. } => "analysis_succeeded",
            Self::AnalysisFailed { .. } => "analysis_failed",
            Self::BeginEdit => "begin_edit",
            Self::EditSucceeded { .. } => "edit_succeeded",
            Self::EditFailed { .. } => "edit_failed",
            Self::BeginEnhance => "begin_enhance",
            Self::EnhanceSucceeded { .. } => "enhance_succeeded",
            Self::EnhanceFailed { .. } => "enhance_failed",
            Self::Restore(_) => "restore",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("'{action}' is not allowed while the session is {phase}")]
    NotAllowed {
        action: &'static str,
        phase: SessionPhase,
    },
    #[error("No image is loaded")]
    NoImage,
    #[error("Unknown element '{0}'")]
    UnknownElement(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("result issued for generation {issued} arrived after the session moved to {current}")]
    Stale { issued: u64, current: u64 },
}

/// Complete interaction state. `generation` advances whenever the base image
/// changes (upload, crop, restore, reset); in-flight results carry the
/// generation they were issued against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub generation: u64,
    pub original: Option<EditableImage>,
    pub edited: Option<EditableImage>,
    pub removed_layer: Option<EditableImage>,
    pub replacement: Option<EditableImage>,
    pub detected_elements: Vec<DetectedElement>,
    pub selection: SelectionSpec,
    pub error: Option<String>,
}

impl SessionState {
    pub fn is_analyzing(&self) -> bool {
        self.phase == SessionPhase::Analyzing
    }

    pub fn is_editing(&self) -> bool {
        self.phase == SessionPhase::Editing
    }

    pub fn is_enhancing(&self) -> bool {
        self.phase == SessionPhase::Enhancing
    }

    /// Returns the next state; `self` is left untouched on error.
    pub fn reduce(&self, action: SessionAction) -> Result<SessionState, TransitionError> {
        let name = action.name();
        let mut next = self.clone();
        match action {
            SessionAction::UploadImage(image) => {
                self.require_phase(name, &[SessionPhase::Empty, SessionPhase::Ready])?;
                next.install_original(image);
            }
            SessionAction::BeginCrop => {
                self.require_image_and_phase(name, SessionPhase::Ready)?;
                next.phase = SessionPhase::Cropping;
            }
            SessionAction::CancelCrop => {
                self.require_phase(name, &[SessionPhase::Cropping])?;
                next.phase = SessionPhase::Ready;
            }
            SessionAction::CompleteCrop(image) => {
                self.require_phase(name, &[SessionPhase::Cropping])?;
                next.install_original(image);
            }
            SessionAction::BeginAreaSelection => {
                self.require_image_and_phase(name, SessionPhase::Ready)?;
                next.phase = SessionPhase::SelectingArea;
            }
            SessionAction::CancelAreaSelection => {
                self.require_phase(name, &[SessionPhase::SelectingArea])?;
                next.phase = SessionPhase::Ready;
            }
            SessionAction::SetArea(area) => {
                self.require_phase(name, &[SessionPhase::SelectingArea, SessionPhase::Ready])?;
                if let Some(area) = area.as_ref() {
                    area.normalized()?;
                }
                next.selection.area = area;
                next.phase = SessionPhase::Ready;
            }
            SessionAction::ToggleElement(element) => {
                self.require_phase(name, &[SessionPhase::Ready])?;
                if !self.detected_elements.iter().any(|e| e.name == element) {
                    return Err(TransitionError::UnknownElement(element));
                }
                next.selection.toggle_element(element.as_str());
            }
            SessionAction::SetCustomInstruction(text) => {
                self.reject_phase(name, &[SessionPhase::Editing, SessionPhase::Enhancing])?;
                next.selection.custom_instruction = text;
            }
            SessionAction::SetReplacement(image) => {
                self.reject_phase(name, &[SessionPhase::Editing, SessionPhase::Enhancing])?;
                next.replacement = image;
            }
            SessionAction::AnalysisSucceeded {
                generation,
                elements,
            } => {
                self.require_in_flight(name, SessionPhase::Analyzing, generation)?;
                next.detected_elements = elements;
                next.phase = SessionPhase::Ready;
            }
            SessionAction::AnalysisFailed {
                generation,
                message,
            } => {
                self.require_in_flight(name, SessionPhase::Analyzing, generation)?;
                next.detected_elements.clear();
                next.error = Some(message);
                next.phase = SessionPhase::Ready;
            }
            SessionAction::BeginEdit => {
                self.require_image_and_phase(name, SessionPhase::Ready)?;
                self.selection.validate(self.replacement.is_some())?;
                next.error = None;
                next.phase = SessionPhase::Editing;
            }
            SessionAction::EditSucceeded {
                generation,
                outcome,
            } => {
                self.require_in_flight(name, SessionPhase::Editing, generation)?;
                next.edited = Some(outcome.edited);
                next.removed_layer = outcome.removed_layer;
                next.phase = SessionPhase::Ready;
            }
            SessionAction::EditFailed {
                generation,
                message,
            } => {
                self.require_in_flight(name, SessionPhase::Editing, generation)?;
                next.error = Some(message);
                next.phase = SessionPhase::Ready;
            }
            SessionAction::BeginEnhance => {
                self.require_image_and_phase(name, SessionPhase::Ready)?;
                next.error = None;
                next.phase = SessionPhase::Enhancing;
            }
            SessionAction::EnhanceSucceeded { generation, edited } => {
                self.require_in_flight(name, SessionPhase::Enhancing, generation)?;
                next.edited = Some(edited);
                next.phase = SessionPhase::Ready;
            }
            SessionAction::EnhanceFailed {
                generation,
                message,
            } => {
                self.require_in_flight(name, SessionPhase::Enhancing, generation)?;
                next.error = Some(message);
                next.phase = SessionPhase::Ready;
            }
            SessionAction::Restore(snapshot) => {
                self.require_phase(name, &[SessionPhase::Empty])?;
                next = snapshot.into_state(self.generation + 1);
            }
            SessionAction::Reset => {
                next = SessionState {
                    generation: self.generation + 1,
                    ..SessionState::default()
                };
            }
        }
        Ok(next)
    }

    /// New base image: everything derived from the old one is dropped.
    fn install_original(&mut self, image: EditableImage) {
        self.original = Some(image);
        self.edited = None;
        self.removed_layer = None;
        self.detected_elements.clear();
        self.selection.selected_elements.clear();
        self.selection.area = None;
        self.error = None;
        self.generation += 1;
        self.phase = SessionPhase::Analyzing;
    }

    fn require_phase(
        &self,
        action: &'static str,
        allowed: &[SessionPhase],
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(TransitionError::NotAllowed {
                action,
                phase: self.phase,
            })
        }
    }

    fn reject_phase(
        &self,
        action: &'static str,
        rejected: &[SessionPhase],
    ) -> Result<(), TransitionError> {
        if rejected.contains(&self.phase) {
            Err(TransitionError::NotAllowed {
                action,
                phase: self.phase,
            })
        } else {
            Ok(())
        }
    }

    fn require_image_and_phase(
        &self,
        action: &'static str,
        phase: SessionPhase,
    ) -> Result<(), TransitionError> {
        self.require_phase(action, &[phase])?;
        if self.original.is_none() {
            return Err(TransitionError::NoImage);
        }
        Ok(())
    }

    fn require_in_flight(
        &self,
        action: &'static str,
        phase: SessionPhase,
        generation: u64,
    ) -> Result<(), TransitionError> {
        if generation != self.generation {
            return Err(TransitionError::Stale {
                issued: generation,
                current: self.generation,
            });
        }
        self.require_phase(action, &[phase])
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::imaging::png_fixture;
    use crate::pipeline::service::ElementKind;

    fn image(shade: u8) -> EditableImage {
        png_fixture(2, 2, [shade, shade, shade, 255])
    }

    fn elements() -> Vec<DetectedElement> {
        vec![DetectedElement {
            name: String::from("Steve"),
            kind: ElementKind::Character,
        }]
    }

    fn ready_state() -> SessionState {
        let uploaded = SessionState::default()
            .reduce(SessionAction::UploadImage(image(10)))
            .expect("upload from empty");
        uploaded
            .reduce(SessionAction::AnalysisSucceeded {
                generation: uploaded.generation,
                elements: elements(),
            })
            .expect("analysis completes")
    }

    #[test]
    fn upload_starts_analysis_and_bumps_generation() {
        let state = SessionState::default()
            .reduce(SessionAction::UploadImage(image(1)))
            .expect("upload from empty");
        assert_eq!(state.phase, SessionPhase::Analyzing);
        assert_eq!(state.generation, 1);
        assert!(state.is_analyzing());
    }

    #[test]
    fn new_image_clears_derived_state() {
        let mut state = ready_state();
        state.edited = Some(image(50));
        state.removed_layer = Some(image(60));
        state.error = Some(String::from("old failure"));
        state.selection.selected_elements = vec![String::from("Steve")];
        state.selection.custom_instruction = String::from("keep me");

        let next = state
            .reduce(SessionAction::UploadImage(image(99)))
            .expect("upload from ready");

        assert_eq!(next.original, Some(image(99)));
        assert_eq!(next.edited, None);
        assert_eq!(next.removed_layer, None);
        assert!(next.detected_elements.is_empty());
        assert!(next.selection.selected_elements.is_empty());
        assert_eq!(next.error, None);
        assert_eq!(next.selection.custom_instruction, "keep me");
    }

    #[test]
    fn completed_crop_reenters_analysis() {
        let state = ready_state();
        let cropping = state.reduce(SessionAction::BeginCrop).expect("crop begins");
        assert_eq!(cropping.phase, SessionPhase::Cropping);

        let mut with_results = cropping.clone();
        with_results.edited = Some(image(5));
        let cropped = with_results
            .reduce(SessionAction::CompleteCrop(image(7)))
            .expect("crop completes");
        assert_eq!(cropped.phase, SessionPhase::Analyzing);
        assert_eq!(cropped.edited, None);
        assert_eq!(cropped.generation, state.generation + 1);

        let cancelled = cropping.reduce(SessionAction::CancelCrop).expect("cancel");
        assert_eq!(cancelled.phase, SessionPhase::Ready);
    }

    #[test]
    fn busy_phases_reject_new_work() {
        let uploaded = SessionState::default()
            .reduce(SessionAction::UploadImage(image(1)))
            .expect("upload");
        for action in [
            SessionAction::BeginEdit,
            SessionAction::BeginEnhance,
            SessionAction::UploadImage(image(2)),
            SessionAction::BeginCrop,
        ] {
            let err = uploaded.reduce(action).expect_err("busy session");
            assert!(matches!(
                err,
                TransitionError::NotAllowed {
                    phase: SessionPhase::Analyzing,
                    ..
                }
            ));
        }
    }

    #[test]
    fn begin_edit_requires_actionable_selection() {
        let state = ready_state();
        assert_eq!(
            state.reduce(SessionAction::BeginEdit),
            Err(TransitionError::Validation(ValidationError::NothingSelected))
        );

        let selected = state
            .reduce(SessionAction::ToggleElement(String::from("Steve")))
            .expect("toggle known element");
        let editing = selected.reduce(SessionAction::BeginEdit).expect("edit begins");
        assert!(editing.is_editing());
    }

    #[test]
    fn unknown_elements_cannot_be_selected() {
        let err = ready_state()
            .reduce(SessionAction::ToggleElement(String::from("Herobrine")))
            .expect_err("not detected");
        assert_eq!(err, TransitionError::UnknownElement(String::from("Herobrine")));
    }

    #[test]
    fn edit_commits_both_results_at_once() {
        let editing = ready_state()
            .reduce(SessionAction::SetCustomInstruction(String::from("x")))
            .and_then(|s| s.reduce(SessionAction::BeginEdit))
            .expect("edit begins");
        let done = editing
            .reduce(SessionAction::EditSucceeded {
                generation: editing.generation,
                outcome: EditOutcome {
                    edited: image(200),
                    removed_layer: Some(image(201)),
                },
            })
            .expect("commit");
        assert_eq!(done.phase, SessionPhase::Ready);
        assert_eq!(done.edited, Some(image(200)));
        assert_eq!(done.removed_layer, Some(image(201)));
    }

    #[test]
    fn failures_return_to_ready_with_error() {
        let enhancing = ready_state()
            .reduce(SessionAction::BeginEnhance)
            .expect("enhance begins");
        let failed = enhancing
            .reduce(SessionAction::EnhanceFailed {
                generation: enhancing.generation,
                message: String::from("overloaded"),
            })
            .expect("failure commit");
        assert_eq!(failed.phase, SessionPhase::Ready);
        assert_eq!(failed.error.as_deref(), Some("overloaded"));
        assert!(failed.original.is_some());
    }

    #[test]
    fn results_from_an_older_generation_are_stale() {
        let editing = ready_state()
            .reduce(SessionAction::SetCustomInstruction(String::from("x")))
            .and_then(|s| s.reduce(SessionAction::BeginEdit))
            .expect("edit begins");
        let issued = editing.generation;
        let reset = editing.reduce(SessionAction::Reset).expect("reset always allowed");

        let err = reset
            .reduce(SessionAction::EditSucceeded {
                generation: issued,
                outcome: EditOutcome {
                    edited: image(1),
                    removed_layer: None,
                },
            })
            .expect_err("stale result");
        assert_eq!(
            err,
            TransitionError::Stale {
                issued,
                current: issued + 1,
            }
        );
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = ready_state();
        state.replacement = Some(image(3));
        let reset = state.reduce(SessionAction::Reset).expect("reset");
        assert_eq!(
            reset,
            SessionState {
                generation: state.generation + 1,
                ..SessionState::default()
            }
        );
    }

    #[test]
    fn area_selection_round_trip() {
        let selecting = ready_state()
            .reduce(SessionAction::BeginAreaSelection)
            .expect("select begins");
        let area = SelectionArea {
            x: 1.0,
            y: 1.0,
            width: 5.0,
            height: 5.0,
            frame_width: 10.0,
            frame_height: 10.0,
        };
        let ready = selecting
            .reduce(SessionAction::SetArea(Some(area)))
            .expect("area set");
        assert_eq!(ready.phase, SessionPhase::Ready);
        assert_eq!(ready.selection.area, Some(area));
    }
}
