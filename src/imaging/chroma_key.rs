use std::time::Duration;

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, warn};

use super::{CodecError, EditableImage, ImageCodec, OutputFormat, SharedImageCodec};

pub const DEFAULT_KEYING_TIMEOUT: Duration = Duration::from_secs(10);

const MIN_GREEN: u16 = 100;

#[derive(Debug, Error)]
pub enum ChromaKeyError {
    #[error("chroma key decode failed: {0}")]
    Decode(#[source] CodecError),
    #[error("chroma key encode failed: {0}")]
    Encode(#[source] CodecError),
    #[error("chroma key timed out after {0:?}")]
    TimedOut(Duration),
    #[error("chroma key task failed: {0}")]
    Task(String),
}

/// Loose one-sided key for saturated #00FF00 screens: `g > 100`, `g > 1.2r`
/// and `g > 1.2b`. Integer form keeps the 1.2 factor exact.
pub fn is_green_background(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (u16::from(r), u16::from(g), u16::from(b));
    g > MIN_GREEN && g * 5 > r * 6 && g * 5 > b * 6
}

/// Zeroes alpha on background pixels and returns how many were keyed.
/// Other pixels keep all four channels. No edge feathering.
pub fn apply_chroma_key_in_place(pixels: &mut RgbaImage) -> u64 {
    let mut keyed = 0_u64;
    for pixel in pixels.pixels_mut() {
        if is_green_background(pixel[0], pixel[1], pixel[2]) {
            pixel[3] = 0;
            keyed += 1;
        }
    }
    keyed
}

pub fn chroma_key(
    codec: &dyn ImageCodec,
    image: &EditableImage,
) -> Result<EditableImage, ChromaKeyError> {
    let mut pixels = codec.decode(image).map_err(ChromaKeyError::Decode)?;
    let keyed = apply_chroma_key_in_place(&mut pixels);
    debug!(
        keyed,
        total = u64::from(pixels.width()) * u64::from(pixels.height()),
        "applied chroma key"
    );
    codec
        .encode(&pixels, OutputFormat::Png)
        .map_err(ChromaKeyError::Encode)
}

/// Keys `image` on the blocking pool with a bounded wait. Any failure resolves
/// to the un-keyed input.
pub async fn chroma_key_or_original(
    codec: SharedImageCodec,
    image: EditableImage,
    timeout: Duration,
) -> EditableImage {
    match chroma_key_with_timeout(codec, image.clone(), timeout).await {
        Ok(keyed) => keyed,
        Err(error) => {
            warn!(error = %error, "chroma key failed; keeping un-keyed extraction");
            image
        }
    }
}

async fn chroma_key_with_timeout(
    codec: SharedImageCodec,
    image: EditableImage,
    timeout: Duration,
) -> Result<EditableImage, ChromaKeyError> {
    let task = tokio::task::spawn_blocking(move || chroma_key(codec.as_ref(), &image));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ChromaKeyError::Task(join_error.to_string())),
        Err(_) => Err(ChromaKeyError::TimedOut(timeout)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use image::Rgba;

    use super::*;
    use crate::imaging::{png_fixture, StdImageCodec};

    #[test]
    fn keys_saturated_green_and_leaves_other_pixels_alone() {
        let mut pixels = RgbaImage::new(2, 1);
        pixels.put_pixel(0, 0, Rgba([10, 255, 10, 255]));
        pixels.put_pixel(1, 0, Rgba([200, 180, 170, 255]));

        let keyed = apply_chroma_key_in_place(&mut pixels);

        assert_eq!(keyed, 1);
        assert_eq!(*pixels.get_pixel(0, 0), Rgba([10, 255, 10, 0]));
        assert_eq!(*pixels.get_pixel(1, 0), Rgba([200, 180, 170, 255]));
    }

    #[test]
    fn predicate_boundaries_are_strict() {
        assert!(!is_green_background(0, 100, 0));
        assert!(is_green_background(0, 101, 0));
        // g == 1.2 * r is not enough
        assert!(!is_green_background(100, 120, 0));
        assert!(is_green_background(100, 121, 0));
        assert!(!is_green_background(0, 180, 150));
        assert!(is_green_background(0, 181, 150));
    }

    #[test]
    fn keyed_output_is_png_with_same_dimensions() {
        let image = png_fixture(6, 4, [0, 255, 0, 255]);
        let keyed = chroma_key(&StdImageCodec, &image).expect("keying should succeed");
        let decoded = StdImageCodec.decode(&keyed).expect("keyed png should decode");
        assert_eq!(decoded.dimensions(), (6, 4));
        assert!(decoded.pixels().all(|p| p[3] == 0));
    }

    #[tokio::test]
    async fn undecodable_input_falls_back_to_original() {
        let broken = EditableImage::new(b"not an image".to_vec(), "image/png");
        let out = chroma_key_or_original(
            Arc::new(StdImageCodec),
            broken.clone(),
            DEFAULT_KEYING_TIMEOUT,
        )
        .await;
        assert_eq!(out, broken);
    }

    /// Decodes through the real codec after `delay`; encoding optionally fails.
    pub(crate) struct ScriptedCodec {
        pub(crate) delay: Duration,
        pub(crate) fail_encode: bool,
    }

    impl ImageCodec for ScriptedCodec {
        fn decode(&self, image: &EditableImage) -> Result<RgbaImage, CodecError> {
            std::thread::sleep(self.delay);
            StdImageCodec.decode(image)
        }

        fn encode(
            &self,
            pixels: &RgbaImage,
            format: OutputFormat,
        ) -> Result<EditableImage, CodecError> {
            if self.fail_encode {
                return Err(CodecError::UnknownFormat(String::from("encoder unavailable")));
            }
            StdImageCodec.encode(pixels, format)
        }
    }

    #[tokio::test]
    async fn slow_decode_times_out_and_returns_input() {
        let green = png_fixture(4, 4, [0, 255, 0, 255]);
        let codec = Arc::new(ScriptedCodec {
            delay: Duration::from_millis(300),
            fail_encode: false,
        });

        let err = chroma_key_with_timeout(codec.clone(), green.clone(), Duration::from_millis(20))
            .await
            .expect_err("decode should exceed the wait");
        assert!(matches!(err, ChromaKeyError::TimedOut(_)));

        let out = chroma_key_or_original(codec, green.clone(), Duration::from_millis(20)).await;
        assert_eq!(out, green);
    }

    #[tokio::test]
    async fn encode_failure_returns_input() {
        let green = png_fixture(4, 4, [0, 255, 0, 255]);
        let codec = ScriptedCodec {
            delay: Duration::ZERO,
            fail_encode: true,
        };
        let err = chroma_key(&codec, &green).expect_err("encode should fail");
        assert!(matches!(err, ChromaKeyError::Encode(_)));

        let out =
            chroma_key_or_original(Arc::new(codec), green.clone(), DEFAULT_KEYING_TIMEOUT).await;
        assert_eq!(out, green);
    }

    #[test]
    fn decode_failure_is_reported_as_decode_error() {
        let broken = EditableImage::new(vec![0, 1, 2], "image/png");
        let err = chroma_key(&StdImageCodec, &broken).expect_err("garbage should not decode");
        assert!(matches!(err, ChromaKeyError::Decode(_)));
    }
}
