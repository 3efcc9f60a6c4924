use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::{error_response, session_response, ApiObject};
use crate::api::server::AppState;
use crate::imaging::{CropRect, EditableImage};
use crate::pipeline::instruction::SelectionArea;

#[derive(Debug, Clone, Deserialize)]
pub struct UploadImageRequest {
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplacementRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaRequest {
    #[serde(default)]
    pub area: Option<SelectionArea>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToggleElementRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstructionRequest {
    #[serde(default)]
    pub text: String,
}

fn parse_image(raw: &str) -> Result<EditableImage, ApiObject<Value>> {
    EditableImage::from_data_uri(raw).map_err(|error| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "invalid_image",
            error.to_string(),
        )
    })
}

pub async fn get_session_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(Ok(state.editor.view()))
}

pub async fn upload_image_handler(
    State(state): State<AppState>,
    Json(payload): Json<UploadImageRequest>,
) -> ApiObject<Value> {
    let image = match parse_image(payload.image.as_str()) {
        Ok(image) => image,
        Err(response) => return response,
    };
    session_response(state.editor.upload_image(image).await)
}

pub async fn begin_crop_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.begin_crop().await)
}

pub async fn cancel_crop_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.cancel_crop().await)
}

pub async fn complete_crop_handler(
    State(state): State<AppState>,
    Json(rect): Json<CropRect>,
) -> ApiObject<Value> {
    session_response(state.editor.complete_crop(rect).await)
}

pub async fn begin_area_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.begin_area_selection().await)
}

pub async fn cancel_area_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.cancel_area_selection().await)
}

pub async fn set_area_handler(
    State(state): State<AppState>,
    Json(payload): Json<AreaRequest>,
) -> ApiObject<Value> {
    session_response(state.editor.set_area(payload.area).await)
}

pub async fn toggle_element_handler(
    State(state): State<AppState>,
    Json(payload): Json<ToggleElementRequest>,
) -> ApiObject<Value> {
    session_response(state.editor.toggle_element(payload.name).await)
}

pub async fn set_instruction_handler(
    State(state): State<AppState>,
    Json(payload): Json<InstructionRequest>,
) -> ApiObject<Value> {
    session_response(state.editor.set_custom_instruction(payload.text).await)
}

pub async fn set_replacement_handler(
    State(state): State<AppState>,
    Json(payload): Json<ReplacementRequest>,
) -> ApiObject<Value> {
    let image = match payload.image.as_deref().map(parse_image).transpose() {
        Ok(image) => image,
        Err(response) => return response,
    };
    session_response(state.editor.set_replacement(image).await)
}

pub async fn apply_edit_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.apply_edit().await)
}

pub async fn auto_enhance_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.auto_enhance().await)
}

pub async fn reset_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_response(state.editor.reset().await)
}
