use serde::{Deserialize, Serialize};
use thiserror::Error;

const NORMALIZED_SCALE: f64 = 1000.0;

/// Rectangle drawn by the user, together with the size of the frame it was
/// drawn against. Normalizing against that frame keeps the box consistent
/// whether the frame was the rendered preview or the natural image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionArea {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub frame_width: f64,
    pub frame_height: f64,
}

/// Box on the 0-1000 scale, serialized as `[ymin, xmin, ymax, xmax]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedBox {
    pub ymin: u32,
    pub xmin: u32,
    pub ymax: u32,
    pub xmax: u32,
}

impl NormalizedBox {
    pub fn as_array(self) -> [u32; 4] {
        [self.ymin, self.xmin, self.ymax, self.xmax]
    }
}

impl SelectionArea {
    pub fn normalized(&self) -> Result<NormalizedBox, ValidationError> {
        let finite = [
            self.x,
            self.y,
            self.width,
            self.height,
            self.frame_width,
            self.frame_height,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite || self.frame_width <= 0.0 || self.frame_height <= 0.0 {
            return Err(ValidationError::InvalidArea);
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ValidationError::InvalidArea);
        }
        Ok(NormalizedBox {
            ymin: normalize(self.y, self.frame_height),
            xmin: normalize(self.x, self.frame_width),
            ymax: normalize(self.y + self.height, self.frame_height),
            xmax: normalize(self.x + self.width, self.frame_width),
        })
    }
}

/// `round((coord / dimension) * 1000)`, half-up, clamped to the scale.
fn normalize(coord: f64, dimension: f64) -> u32 {
    let scaled = (coord / dimension) * NORMALIZED_SCALE;
    (scaled + 0.5).floor().clamp(0.0, NORMALIZED_SCALE) as u32
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionSpec {
    #[serde(default)]
    pub selected_elements: Vec<String>,
    #[serde(default)]
    pub area: Option<SelectionArea>,
    #[serde(default)]
    pub custom_instruction: String,
}

impl SelectionSpec {
    /// Adds `name` if absent, removes it otherwise. Keeps selection order.
    pub fn toggle_element(&mut self, name: &str) {
        if let Some(pos) = self.selected_elements.iter().position(|v| v == name) {
            self.selected_elements.remove(pos);
        } else {
            self.selected_elements.push(name.to_string());
        }
    }

    pub fn custom_instruction_text(&self) -> Option<&str> {
        Some(self.custom_instruction.trim()).filter(|v| !v.is_empty())
    }

    pub fn validate(&self, has_replacement: bool) -> Result<(), ValidationError> {
        if let Some(area) = self.area.as_ref() {
            area.normalized()?;
        }
        let actionable = !self.selected_elements.is_empty()
            || self.area.is_some()
            || self.custom_instruction_text().is_some()
            || has_replacement;
        if actionable {
            Ok(())
        } else {
            Err(ValidationError::NothingSelected)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(
        "Select at least one element, draw an area, write an instruction or add a replacement image"
    )]
    NothingSelected,
    #[error("Selection area must have a positive size inside a non-empty frame")]
    InvalidArea,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionClause {
    RemoveElements(Vec<String>),
    FocusArea(NormalizedBox),
    Custom(String),
    UseReplacement,
}

impl InstructionClause {
    /// Serialization rank; the model is sensitive to clause order.
    fn rank(&self) -> u8 {
        match self {
            Self::RemoveElements(_) => 0,
            Self::FocusArea(_) => 1,
            Self::Custom(_) => 2,
            Self::UseReplacement => 3,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::RemoveElements(names) => format!(
                "Remove the following elements from the image: {}. Fill the vacated regions so they blend seamlessly with the surrounding scene.",
                names.join(", ")
            ),
            Self::FocusArea(bbox) => {
                let [ymin, xmin, ymax, xmax] = bbox.as_array();
                format!(
                    "Focus the edit on the region with bounding box [ymin, xmin, ymax, xmax] = [{ymin}, {xmin}, {ymax}, {xmax}] on a 0-1000 normalized scale."
                )
            }
            Self::Custom(text) => text.clone(),
            Self::UseReplacement => String::from(
                "Use the second provided image as the replacement content and integrate it into the edited area, matching the lighting and perspective of the thumbnail.",
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstructionBuilder {
    clauses: Vec<InstructionClause>,
}

impl InstructionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, clause: InstructionClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Renders clauses in rank order regardless of push order.
    pub fn build(mut self) -> String {
        self.clauses.sort_by_key(InstructionClause::rank);
        self.clauses
            .iter()
            .map(InstructionClause::render)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn compose_edit_instruction(
    selection: &SelectionSpec,
    has_replacement: bool,
) -> Result<String, ValidationError> {
    selection.validate(has_replacement)?;
    let mut builder = InstructionBuilder::new();
    if !selection.selected_elements.is_empty() {
        builder = builder.push(InstructionClause::RemoveElements(
            selection.selected_elements.clone(),
        ));
    }
    if let Some(area) = selection.area.as_ref() {
        builder = builder.push(InstructionClause::FocusArea(area.normalized()?));
    }
    if let Some(text) = selection.custom_instruction_text() {
        builder = builder.push(InstructionClause::Custom(text.to_string()));
    }
    if has_replacement {
        builder = builder.push(InstructionClause::UseReplacement);
    }
    Ok(builder.build())
}

/// What the layer extraction should isolate: element names first, then the
/// custom instruction, then the focus area. `None` skips extraction.
pub fn extraction_subject(selection: &SelectionSpec) -> Option<String> {
    if !selection.selected_elements.is_empty() {
        return Some(selection.selected_elements.join(", "));
    }
    if let Some(text) = selection.custom_instruction_text() {
        return Some(text.to_string());
    }
    let bbox = selection.area.as_ref()?.normalized().ok()?;
    let [ymin, xmin, ymax, xmax] = bbox.as_array();
    Some(format!(
        "the content inside bounding box [ymin, xmin, ymax, xmax] = [{ymin}, {xmin}, {ymax}, {xmax}] (0-1000 scale)"
    ))
}
