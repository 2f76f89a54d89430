//! MIME normalization and the set of image types the decoder accepts.

use std::path::Path;

use image::ImageFormat;

/// Image MIME types accepted for extraction.
pub const SUPPORTED_IMAGE_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
];

/// Lower-case, strip parameters (`; charset=...`) and fold common aliases.
pub fn normalize_mime(mime: &str) -> String {
    let base = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();

    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-ms-bmp" | "image/x-bmp" => "image/bmp".to_string(),
        "image/tif" | "image/x-tiff" => "image/tiff".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => base,
    }
}

/// Whether a declared type carries no real information about the content.
pub fn is_generic_mime(mime: &str) -> bool {
    let normalized = normalize_mime(mime);
    normalized.is_empty()
        || normalized == "application/octet-stream"
        || normalized == "binary/octet-stream"
}

pub fn is_supported_image(mime: &str) -> bool {
    SUPPORTED_IMAGE_MIME_TYPES.contains(&normalize_mime(mime).as_str())
}

/// Decoder format for a supported MIME type.
pub fn image_format(mime: &str) -> Option<ImageFormat> {
    match normalize_mime(mime).as_str() {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        "image/bmp" => Some(ImageFormat::Bmp),
        "image/tiff" => Some(ImageFormat::Tiff),
        _ => None,
    }
}

/// Guess a MIME type from a file name, falling back to octet-stream.
pub fn guess_mime_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| normalize_mime(m.essence_str()))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mime() {
        assert_eq!(normalize_mime("IMAGE/JPG"), "image/jpeg");
        assert_eq!(normalize_mime("image/png; charset=binary"), "image/png");
        assert_eq!(normalize_mime(" image/x-ms-bmp "), "image/bmp");
        assert_eq!(normalize_mime("text/plain"), "text/plain");
    }

    #[test]
    fn test_supported_images() {
        assert!(is_supported_image("image/png"));
        assert!(is_supported_image("image/jpg"));
        assert!(is_supported_image("image/tiff"));
        assert!(!is_supported_image("application/pdf"));
        assert!(!is_supported_image("image/svg+xml"));
    }

    #[test]
    fn test_generic_mime() {
        assert!(is_generic_mime(""));
        assert!(is_generic_mime("application/octet-stream"));
        assert!(!is_generic_mime("image/png"));
    }

    #[test]
    fn test_image_format() {
        assert_eq!(image_format("image/webp"), Some(ImageFormat::WebP));
        assert_eq!(image_format("image/heic"), None);
    }

    #[test]
    fn test_guess_mime_for_path() {
        assert_eq!(guess_mime_for_path(Path::new("scan.PNG")), "image/png");
        assert_eq!(guess_mime_for_path(Path::new("photo.jpg")), "image/jpeg");
        assert_eq!(
            guess_mime_for_path(Path::new("noext")),
            "application/octet-stream"
        );
    }
}
