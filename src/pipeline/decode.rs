//! Image decoder: raw bytes to an upright 8-bit luminance raster.
//!
//! The declared content type is checked against magic-byte sniffing before any
//! codec runs. EXIF orientation is applied and then dropped with the rest of
//! the metadata.

use std::io::Cursor;

use image::{DynamicImage, ImageError, ImageReader, Limits};
use tracing::debug;

use super::error::ExtractionError;
use super::types::NormalizedRaster;
use crate::utils::{format_size, image_format, is_generic_mime, is_supported_image, normalize_mime};

/// Default cap on uploaded bytes (10 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default cap on either decoded dimension.
pub const DEFAULT_MAX_SIDE: u32 = 20_000;

/// Size limits enforced before and during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_input_bytes: usize,
    pub max_side: u32,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_side: DEFAULT_MAX_SIDE,
        }
    }
}

/// Decodes uploads into [`NormalizedRaster`]s.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    limits: DecodeLimits,
}

impl Decoder {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    pub fn decode(
        &self,
        bytes: &[u8],
        declared_mime: &str,
    ) -> Result<NormalizedRaster, ExtractionError> {
        if bytes.is_empty() {
            return Err(ExtractionError::corrupt_image("empty image buffer"));
        }
        if bytes.len() > self.limits.max_input_bytes {
            return Err(ExtractionError::input_too_large(format!(
                "{} exceeds the {} upload limit",
                format_size(bytes.len() as u64),
                format_size(self.limits.max_input_bytes as u64)
            )));
        }

        let sniffed = self.sniff(bytes, declared_mime)?;
        let format = image_format(&sniffed).ok_or_else(|| {
            ExtractionError::unsupported_format(format!("no decoder for {}", sniffed))
        })?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.limits.max_side);
        limits.max_image_height = Some(self.limits.max_side);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        let decoded = reader.decode().map_err(|e| match e {
            ImageError::Limits(limits_err) => ExtractionError::input_too_large(format!(
                "decoded image exceeds limits: {}",
                limits_err
            )),
            ImageError::Unsupported(unsupported) => {
                ExtractionError::unsupported_format(unsupported.to_string())
            }
            other => {
                ExtractionError::corrupt_image(format!("failed to decode {}: {}", sniffed, other))
            }
        })?;

        let orientation = read_exif_orientation(bytes);
        let upright = apply_orientation(decoded, orientation);
        let gray = upright.to_luma8();

        debug!(
            mime = %sniffed,
            width = gray.width(),
            height = gray.height(),
            orientation,
            "Decoded image"
        );

        Ok(NormalizedRaster::new(gray))
    }

    /// Identify the content type and reconcile it with the declared one.
    fn sniff(&self, bytes: &[u8], declared_mime: &str) -> Result<String, ExtractionError> {
        let declared = normalize_mime(declared_mime);
        let generic = is_generic_mime(&declared);

        if !generic && !is_supported_image(&declared) {
            return Err(ExtractionError::unsupported_format(format!(
                "declared type {} is not a supported image type",
                declared
            )));
        }

        let detected = match infer::get(bytes) {
            Some(kind) => normalize_mime(kind.mime_type()),
            None if generic => {
                return Err(ExtractionError::unsupported_format(
                    "content does not match any known image codec",
                ))
            }
            // Claimed a real image type but the magic bytes are gone.
            None => {
                return Err(ExtractionError::corrupt_image(format!(
                    "content is not a valid {} stream",
                    declared
                )))
            }
        };

        if !is_supported_image(&detected) {
            return Err(ExtractionError::unsupported_format(format!(
                "content is {}, not a supported image type",
                detected
            )));
        }

        if !generic && detected != declared {
            return Err(ExtractionError::unsupported_format(format!(
                "declared {} but content is {}",
                declared, detected
            )));
        }

        Ok(detected)
    }
}

/// Decode with default limits.
pub fn decode(bytes: &[u8], declared_mime: &str) -> Result<NormalizedRaster, ExtractionError> {
    Decoder::default().decode(bytes, declared_mime)
}

/// Read EXIF tag 0x0112 (Orientation). Returns 1 (upright) when absent.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation value.
///
/// 1 = normal, 2 = mirrored, 3 = 180°, 4 = flipped vertically,
/// 5 = mirrored + 90° CW, 6 = 90° CW, 7 = mirrored + 270° CW, 8 = 270° CW.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(width, height, |x, _| Luma([(x % 256) as u8]));
        encode(DynamicImage::ImageLuma8(img), ImageFormat::Png)
    }

    #[test]
    fn test_decode_png_to_luma() {
        let raster = decode(&png(40, 20), "image/png").unwrap();
        assert_eq!(raster.width(), 40);
        assert_eq!(raster.height(), 20);
        assert_eq!(raster.pixels().len(), 800);
        assert_eq!(NormalizedRaster::CHANNELS, 1);
    }

    #[test]
    fn test_decode_rgb_converts_to_single_channel() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let raster = decode(&bytes, "image/png").unwrap();
        assert_eq!(raster.pixels().len(), 64);
    }

    #[test]
    fn test_declared_alias_accepted() {
        let img = RgbImage::from_pixel(16, 16, Rgb([10, 20, 30]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);
        assert!(decode(&bytes, "image/jpg").is_ok());
    }

    #[test]
    fn test_generic_declared_type_uses_sniffed() {
        assert!(decode(&png(4, 4), "application/octet-stream").is_ok());
        assert!(decode(&png(4, 4), "").is_ok());
    }

    #[test]
    fn test_mismatched_declared_type() {
        let err = decode(&png(4, 4), "image/jpeg").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
        assert!(err.cause.contains("image/png"));
    }

    #[test]
    fn test_unsupported_declared_type() {
        let err = decode(&png(4, 4), "application/pdf").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_unknown_content_with_generic_type() {
        let err = decode(b"just some text, not an image", "application/octet-stream").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_truncated_png_is_corrupt() {
        let bytes = png(64, 64);
        let truncated = &bytes[..bytes.len() / 2];
        let err = decode(truncated, "image/png").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptImage);
    }

    #[test]
    fn test_garbage_claiming_png_is_corrupt() {
        let err = decode(&[0x13u8; 256], "image/png").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptImage);
    }

    #[test]
    fn test_empty_buffer_is_corrupt() {
        let err = decode(&[], "image/png").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptImage);
    }

    #[test]
    fn test_input_byte_limit() {
        let decoder = Decoder::new(DecodeLimits {
            max_input_bytes: 16,
            max_side: DEFAULT_MAX_SIDE,
        });
        let err = decoder.decode(&png(32, 32), "image/png").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputTooLarge);
    }

    #[test]
    fn test_dimension_limit() {
        let decoder = Decoder::new(DecodeLimits {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_side: 10,
        });
        let err = decoder.decode(&png(32, 8), "image/png").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputTooLarge);
    }

    #[test]
    fn test_png_without_exif_is_upright() {
        assert_eq!(read_exif_orientation(&png(4, 4)), 1);
    }

    #[test]
    fn test_apply_orientation() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(30, 10));
        assert_eq!(apply_orientation(img.clone(), 1).width(), 30);
        assert_eq!(apply_orientation(img.clone(), 6).width(), 10);
        assert_eq!(apply_orientation(img.clone(), 8).height(), 30);
        assert_eq!(apply_orientation(img.clone(), 3).width(), 30);
        assert_eq!(apply_orientation(img, 42).width(), 30);
    }
}
