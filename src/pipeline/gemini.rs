use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::service::{DetectedElement, ElementKind, GenerativeEditService, ServiceError};
use crate::imaging::EditableImage;

pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const TARGET_ASPECT_RATIO: &str = "16:9";
const OUTPUT_CONSTRAINT: &str = "Output a 16:9 image at 1920x1080 resolution.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub analysis_model: String,
    pub image_model: String,
    pub request_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: String::from(DEFAULT_API_BASE_URL),
            analysis_model: String::from(DEFAULT_ANALYSIS_MODEL),
            image_model: String::from(DEFAULT_IMAGE_MODEL),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Gemini `generateContent` client. The blocking HTTP client is built per
/// call so it is only ever created and dropped on the blocking pool.
#[derive(Debug, Clone)]
pub struct GeminiEditService {
    config: GeminiConfig,
}

impl GeminiEditService {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    fn generate_content(&self, model: &str, body: &Value) -> Result<Value, ServiceError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ServiceError::MissingApiKey)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_base_url.trim_end_matches('/'),
            model
        );
        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| ServiceError::ClientInit(e.to_string()))?;
        debug!(model, "sending generateContent request");
        let resp = client
            .post(url.as_str())
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .map_err(|e| ServiceError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .map_err(|e| ServiceError::MalformedResponse(format!("JSON decode failed: {e}")))
    }

    fn generate_image(
        &self,
        images: &[&EditableImage],
        prompt: String,
    ) -> Result<EditableImage, ServiceError> {
        let body = image_request_body(images, prompt.as_str());
        let payload = self.generate_content(self.config.image_model.as_str(), &body)?;
        parse_image_response(&payload)
    }
}

impl GenerativeEditService for GeminiEditService {
    fn analyze(&self, image: &EditableImage) -> Result<Vec<DetectedElement>, ServiceError> {
        let body = analyze_request_body(image);
        let payload = self.generate_content(self.config.analysis_model.as_str(), &body)?;
        parse_analyze_response(&payload)
    }

    fn edit(
        &self,
        image: &EditableImage,
        instruction: &str,
        replacement: Option<&EditableImage>,
    ) -> Result<EditableImage, ServiceError> {
        let mut images = vec![image];
        images.extend(replacement);
        self.generate_image(images.as_slice(), edit_prompt(instruction))
    }

    fn extract(&self, image: &EditableImage, subject: &str) -> Result<EditableImage, ServiceError> {
        self.generate_image(&[image], extract_prompt(subject))
    }

    fn enhance(&self, image: &EditableImage) -> Result<EditableImage, ServiceError> {
        self.generate_image(&[image], enhance_prompt())
    }
}

fn inline_image_part(image: &EditableImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.base64_payload(),
        }
    })
}

pub(crate) fn analyze_request_body(image: &EditableImage) -> Value {
    let kinds = ElementKind::ALL
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>();
    json!({
        "contents": [{
            "parts": [
                inline_image_part(image),
                { "text": format!(
                    "Analyze this YouTube gaming thumbnail and list its salient visual elements. \
                     Give each element a short descriptive name and one type from: {}.",
                    kinds.join(", ")
                ) }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "detected_elements": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "name": { "type": "STRING" },
                                "type": { "type": "STRING", "enum": kinds }
                            },
                            "required": ["name", "type"]
                        }
                    }
                },
                "required": ["detected_elements"]
            }
        }
    })
}

pub(crate) fn image_request_body(images: &[&EditableImage], prompt: &str) -> Value {
    let mut parts = images
        .iter()
        .map(|image| inline_image_part(image))
        .collect::<Vec<_>>();
    parts.push(json!({ "text": prompt }));
    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": TARGET_ASPECT_RATIO }
        }
    })
}

fn edit_prompt(instruction: &str) -> String {
    format!(
        "You are editing a YouTube gaming thumbnail. {instruction} Keep every other part of the image unchanged. {OUTPUT_CONSTRAINT}"
    )
}

fn extract_prompt(subject: &str) -> String {
    format!(
        "Extract only {subject} from this image. Keep them exactly as they appear, at the same position and scale, and place them on a solid pure green (#00FF00) background with no shadows or gradients. {OUTPUT_CONSTRAINT}"
    )
}

fn enhance_prompt() -> String {
    format!(
        "Enhance this YouTube gaming thumbnail so it stands out at small sizes: boost color vibrancy and contrast and sharpen details. Do not add, remove or move any element. {OUTPUT_CONSTRAINT}"
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzePayload {
    detected_elements: Vec<DetectedElement>,
}

fn decode_response(payload: &Value) -> Result<GenerateContentResponse, ServiceError> {
    let parsed: GenerateContentResponse = serde_json::from_value(payload.clone())
        .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
    if let Some(reason) = parsed
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(ServiceError::Blocked(reason.to_string()));
    }
    Ok(parsed)
}

fn first_parts(parsed: &GenerateContentResponse) -> Result<&[Part], ServiceError> {
    let candidate = parsed
        .candidates
        .first()
        .ok_or_else(|| ServiceError::MalformedResponse(String::from("no candidates")))?;
    let parts = candidate
        .content
        .as_ref()
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();
    if parts.is_empty() {
        if let Some(reason) = candidate
            .finish_reason
            .as_deref()
            .filter(|r| *r != "STOP")
        {
            return Err(ServiceError::Blocked(reason.to_string()));
        }
    }
    Ok(parts)
}

pub(crate) fn parse_analyze_response(payload: &Value) -> Result<Vec<DetectedElement>, ServiceError> {
    let parsed = decode_response(payload)?;
    let text = first_parts(&parsed)?
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect::<String>();
    if text.trim().is_empty() {
        return Err(ServiceError::MalformedResponse(String::from(
            "analysis returned no text",
        )));
    }
    let analysis: AnalyzePayload = serde_json::from_str(text.trim())
        .map_err(|e| ServiceError::MalformedResponse(format!("analysis JSON: {e}")))?;
    Ok(analysis
        .detected_elements
        .into_iter()
        .filter(|element| !element.name.trim().is_empty())
        .collect())
}

pub(crate) fn parse_image_response(payload: &Value) -> Result<EditableImage, ServiceError> {
    let parsed = decode_response(payload)?;
    let inline = first_parts(&parsed)?
        .iter()
        .find_map(|part| part.inline_data.as_ref())
        .ok_or(ServiceError::NoImage)?;
    let bytes = BASE64_STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| ServiceError::MalformedResponse(format!("image base64 decode failed: {e}")))?;
    Ok(EditableImage::new(bytes, inline.mime_type.clone()))
}
