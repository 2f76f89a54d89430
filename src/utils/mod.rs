//! Shared utility functions.
//!
//! - `format`: Human-readable sizes and durations
//! - `mime`: MIME normalization and supported image types

mod format;
mod mime;

pub use format::{format_duration, format_size};
pub use mime::{
    guess_mime_for_path, image_format, is_generic_mime, is_supported_image, normalize_mime,
    SUPPORTED_IMAGE_MIME_TYPES,
};
