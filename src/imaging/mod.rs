pub mod chroma_key;

use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded image bytes plus their MIME type.
///
/// Serializes as a `data:<mime>;base64,<payload>` URI so snapshots and API
/// payloads carry images as plain strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EditableImage {
    bytes: Vec<u8>,
    mime_type: String,
}

impl EditableImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Sniffs the container format from the leading bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        let format = image::guess_format(bytes.as_slice())
            .map_err(|e| CodecError::UnknownFormat(e.to_string()))?;
        Ok(Self::new(bytes, format.to_mime_type()))
    }

    pub fn from_data_uri(raw: &str) -> Result<Self, CodecError> {
        let rest = raw
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| CodecError::InvalidDataUri(String::from("missing 'data:' prefix")))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| CodecError::InvalidDataUri(String::from("missing ',' separator")))?;
        let mime_type = header.strip_suffix(";base64").ok_or_else(|| {
            CodecError::InvalidDataUri(String::from("only base64 data URIs are supported"))
        })?;
        if !mime_type.starts_with("image/") {
            return Err(CodecError::InvalidDataUri(format!(
                "unsupported media type '{mime_type}'"
            )));
        }
        let bytes = BASE64_STANDARD
            .decode(payload.trim().as_bytes())
            .map_err(|e| CodecError::InvalidDataUri(format!("base64 decode failed: {e}")))?;
        if bytes.is_empty() {
            return Err(CodecError::InvalidDataUri(String::from("empty payload")));
        }
        Ok(Self::new(bytes, mime_type))
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64_STANDARD.encode(self.bytes.as_slice())
        )
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn mime_type(&self) -> &str {
        self.mime_type.as_str()
    }

    pub fn base64_payload(&self) -> String {
        BASE64_STANDARD.encode(self.bytes.as_slice())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for EditableImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditableImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl TryFrom<String> for EditableImage {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_data_uri(value.as_str())
    }
}

impl From<EditableImage> for String {
    fn from(value: EditableImage) -> Self {
        value.to_data_uri()
    }
}

/// Crop rectangle in the image's natural pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid image data URI: {0}")]
    InvalidDataUri(String),
    #[error("unrecognized image format: {0}")]
    UnknownFormat(String),
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("crop {rect:?} does not intersect a {width}x{height} image")]
    EmptyCrop {
        rect: CropRect,
        width: u32,
        height: u32,
    },
}

/// Pixel access for encoded images.
pub trait ImageCodec: Send + Sync + 'static {
    fn decode(&self, image: &EditableImage) -> Result<RgbaImage, CodecError>;
    fn encode(
        &self,
        pixels: &RgbaImage,
        format: OutputFormat,
    ) -> Result<EditableImage, CodecError>;

    /// Natural dimensions without keeping the decoded buffer around.
    fn dimensions(&self, image: &EditableImage) -> Result<(u32, u32), CodecError> {
        self.decode(image).map(|pixels| pixels.dimensions())
    }

    /// Crops in natural pixel space; the rectangle is clamped to the image bounds.
    fn crop(&self, image: &EditableImage, rect: CropRect) -> Result<EditableImage, CodecError> {
        let pixels = self.decode(image)?;
        let (width, height) = pixels.dimensions();
        let x = rect.x.min(width);
        let y = rect.y.min(height);
        let w = rect.width.min(width - x);
        let h = rect.height.min(height - y);
        if w == 0 || h == 0 {
            return Err(CodecError::EmptyCrop {
                rect,
                width,
                height,
            });
        }
        let cropped = image::imageops::crop_imm(&pixels, x, y, w, h).to_image();
        self.encode(&cropped, OutputFormat::Png)
    }
}

pub type SharedImageCodec = Arc<dyn ImageCodec>;

#[derive(Debug, Clone, Copy, Default)]
pub struct StdImageCodec;

impl ImageCodec for StdImageCodec {
    fn decode(&self, image: &EditableImage) -> Result<RgbaImage, CodecError> {
        image::load_from_memory(image.bytes())
            .map(|decoded| decoded.to_rgba8())
            .map_err(CodecError::Decode)
    }

    fn encode(
        &self,
        pixels: &RgbaImage,
        format: OutputFormat,
    ) -> Result<EditableImage, CodecError> {
        let dynamic = match format {
            // JPEG has no alpha channel.
            OutputFormat::Jpeg => {
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(pixels.clone()).to_rgb8())
            }
            OutputFormat::Png => DynamicImage::ImageRgba8(pixels.clone()),
        };
        let mut out = Cursor::new(Vec::new());
        dynamic
            .write_to(&mut out, format.image_format())
            .map_err(CodecError::Encode)?;
        Ok(EditableImage::new(
            out.into_inner(),
            format.image_format().to_mime_type(),
        ))
    }

    fn dimensions(&self, image: &EditableImage) -> Result<(u32, u32), CodecError> {
        ImageReader::new(Cursor::new(image.bytes()))
            .with_guessed_format()
            .map_err(|e| CodecError::UnknownFormat(e.to_string()))?
            .into_dimensions()
            .map_err(CodecError::Decode)
    }
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32, rgba: [u8; 4]) -> EditableImage {
    let pixels = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    StdImageCodec
        .encode(&pixels, OutputFormat::Png)
        .expect("fixture should encode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_survives_serde_as_plain_string() {
        let image = png_fixture(2, 2, [1, 2, 3, 255]);
        let json = serde_json::to_string(&image).expect("image should serialize");
        assert!(json.starts_with("\"data:image/png;base64,"));

        let back: EditableImage = serde_json::from_str(json.as_str()).expect("should parse");
        assert_eq!(back, image);
    }

    #[test]
    fn rejects_non_image_data_uris() {
        let err = EditableImage::from_data_uri("data:text/plain;base64,aGVsbG8=")
            .expect_err("text payload should be rejected");
        assert!(matches!(err, CodecError::InvalidDataUri(_)));

        let err = EditableImage::from_data_uri("https://example.com/a.png")
            .expect_err("remote urls are not data uris");
        assert!(err.to_string().contains("data:"));
    }

    #[test]
    fn sniffs_png_mime_type() {
        let image = png_fixture(1, 1, [0, 0, 0, 255]);
        let sniffed = EditableImage::from_bytes(image.bytes().to_vec()).expect("png sniff");
        assert_eq!(sniffed.mime_type(), "image/png");
    }

    #[test]
    fn crop_clamps_to_bounds_and_reports_natural_size() {
        let image = png_fixture(40, 30, [9, 9, 9, 255]);
        let cropped = StdImageCodec
            .crop(
                &image,
                CropRect {
                    x: 30,
                    y: 10,
                    width: 100,
                    height: 5,
                },
            )
            .expect("crop should succeed");
        assert_eq!(StdImageCodec.dimensions(&cropped).expect("dims"), (10, 5));
    }

    #[test]
    fn crop_outside_image_is_an_error() {
        let image = png_fixture(4, 4, [9, 9, 9, 255]);
        let err = StdImageCodec
            .crop(
                &image,
                CropRect {
                    x: 10,
                    y: 0,
                    width: 2,
                    height: 2,
                },
            )
            .expect_err("crop past the right edge is empty");
        assert!(matches!(err, CodecError::EmptyCrop { .. }));
    }

    #[test]
    fn jpeg_encoding_drops_alpha() {
        let pixels = RgbaImage::from_pixel(3, 3, image::Rgba([200, 10, 10, 0]));
        let encoded = StdImageCodec
            .encode(&pixels, OutputFormat::Jpeg)
            .expect("jpeg encode");
        assert_eq!(encoded.mime_type(), "image/jpeg");
        assert_eq!(StdImageCodec.dimensions(&encoded).expect("dims"), (3, 3));
    }
}
