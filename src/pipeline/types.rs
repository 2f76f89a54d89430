//! Artifacts handed between pipeline stages, plus request options.

use std::collections::BTreeSet;

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Uploaded bytes and the content type the caller claims they are.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub declared_mime: String,
}

impl RawImage {
    pub fn new(bytes: impl Into<Vec<u8>>, declared_mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            declared_mime: declared_mime.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded raster in the pipeline's single color space: 8-bit luminance.
///
/// Orientation metadata has already been applied; the pixel grid is upright.
#[derive(Debug, Clone)]
pub struct NormalizedRaster {
    image: GrayImage,
}

impl NormalizedRaster {
    pub const CHANNELS: u8 = 1;
    pub const BIT_DEPTH: u8 = 8;

    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

/// A cleanup step that was actually applied to a raster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum Transform {
    Downscale {
        from_width: u32,
        from_height: u32,
        to_width: u32,
        to_height: u32,
    },
    Denoise {
        radius: u32,
    },
    Binarize {
        threshold: u8,
    },
    Deskew {
        angle_degrees: f32,
        confidence: f32,
    },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Downscale { .. } => "downscale",
            Transform::Denoise { .. } => "denoise",
            Transform::Binarize { .. } => "binarize",
            Transform::Deskew { .. } => "deskew",
        }
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Number of rows shared with `other`.
    pub fn vertical_overlap(&self, other: &BoundingBox) -> u32 {
        let top = self.y.max(other.y);
        let bottom = self.bottom().min(other.bottom());
        bottom.saturating_sub(top)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }
}

/// How a preprocessed raster relates to the decoded source raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterGeometry {
    pub source_width: u32,
    pub source_height: u32,
    /// Processed size divided by source size (1.0 when not resized).
    pub scale: f64,
    /// Clockwise rotation applied by deskew, in degrees.
    pub rotation_degrees: f32,
    pub width: u32,
    pub height: u32,
}

impl RasterGeometry {
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            source_width: width,
            source_height: height,
            scale: 1.0,
            rotation_degrees: 0.0,
            width,
            height,
        }
    }

    /// Map a box from processed-raster coordinates back onto the source raster.
    ///
    /// Undoes the deskew rotation about the raster center, then the scale, and
    /// clamps the enclosing box to the source bounds.
    pub fn to_source(&self, bbox: &BoundingBox) -> BoundingBox {
        let corners = [
            (bbox.x as f64, bbox.y as f64),
            (bbox.right() as f64, bbox.y as f64),
            (bbox.x as f64, bbox.bottom() as f64),
            (bbox.right() as f64, bbox.bottom() as f64),
        ];

        let theta = (self.rotation_degrees as f64).to_radians();
        let (sin, cos) = theta.sin_cos();
        let cx = self.width as f64 / 2.0;
        let cy = self.height as f64 / 2.0;
        let scale = if self.scale > 0.0 { self.scale } else { 1.0 };

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for (px, py) in corners {
            let (dx, dy) = (px - cx, py - cy);
            let ux = cx + cos * dx + sin * dy;
            let uy = cy - sin * dx + cos * dy;
            let (sx, sy) = (ux / scale, uy / scale);
            min_x = min_x.min(sx);
            min_y = min_y.min(sy);
            max_x = max_x.max(sx);
            max_y = max_y.max(sy);
        }

        let w = self.source_width as f64;
        let h = self.source_height as f64;
        let left = min_x.floor().clamp(0.0, w);
        let top = min_y.floor().clamp(0.0, h);
        let right = max_x.ceil().clamp(0.0, w);
        let bottom = max_y.ceil().clamp(0.0, h);

        BoundingBox {
            x: left as u32,
            y: top as u32,
            width: (right - left).max(0.0) as u32,
            height: (bottom - top).max(0.0) as u32,
        }
    }
}

/// Raster after cleanup, tagged with what was done to it.
#[derive(Debug, Clone)]
pub struct PreprocessedRaster {
    image: GrayImage,
    transforms: Vec<Transform>,
    geometry: RasterGeometry,
}

impl PreprocessedRaster {
    pub fn new(image: GrayImage, transforms: Vec<Transform>, geometry: RasterGeometry) -> Self {
        Self {
            image,
            transforms,
            geometry,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn geometry(&self) -> &RasterGeometry {
        &self.geometry
    }

    /// True when every pixel has the same value (nothing to read).
    pub fn is_uniform(&self) -> bool {
        let raw = self.image.as_raw();
        match raw.first() {
            Some(first) => raw.iter().all(|p| p == first),
            None => true,
        }
    }

    pub fn into_parts(self) -> (GrayImage, Vec<Transform>, RasterGeometry) {
        (self.image, self.transforms, self.geometry)
    }
}

/// One recognized text fragment in source-raster coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSpan {
    pub text: String,
    /// Engine confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub reading_order: usize,
    /// Set by aggregation when confidence is under the request threshold.
    #[serde(default)]
    pub below_threshold: bool,
}

/// A reading-order line of spans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLine {
    pub bbox: BoundingBox,
    /// Indices into [`ExtractionResult::spans`].
    pub spans: Vec<usize>,
    /// Text of the spans that passed the confidence filter.
    pub text: String,
    pub confidence: f32,
}

/// Final output of one extraction request.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub spans: Vec<RecognizedSpan>,
    pub lines: Vec<TextLine>,
    pub full_text: String,
    pub confidence: f32,
    pub duration_ms: u64,
    pub diagnostics: Diagnostics,
}

/// Reproducibility details attached by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub source_width: u32,
    pub source_height: u32,
    pub transforms: Vec<Transform>,
    pub engine: String,
    pub input_sha256: String,
}

/// Switches for the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessOptions {
    pub denoise: bool,
    pub binarize: bool,
    pub deskew: bool,
    pub max_dimension: u32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            denoise: true,
            binarize: true,
            deskew: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Post-recognition filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOptions {
    pub min_confidence: f32,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

pub const DEFAULT_MAX_DIMENSION: u32 = 3000;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// Per-request options accepted by [`crate::pipeline::Pipeline::extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    pub language_hints: BTreeSet<String>,
    pub min_confidence: f32,
    pub max_dimension: u32,
    pub denoise: bool,
    pub binarize: bool,
    pub deskew: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        let pre = PreprocessOptions::default();
        Self {
            language_hints: BTreeSet::new(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_dimension: pre.max_dimension,
            denoise: pre.denoise,
            binarize: pre.binarize,
            deskew: pre.deskew,
        }
    }
}

impl ExtractOptions {
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.language_hints = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn preprocess(&self) -> PreprocessOptions {
        PreprocessOptions {
            denoise: self.denoise,
            binarize: self.binarize,
            deskew: self.deskew,
            max_dimension: self.max_dimension,
        }
    }

    /// Confidence threshold clamped into [0, 1]; NaN disables filtering.
    pub fn filter(&self) -> FilterOptions {
        let min_confidence = if self.min_confidence.is_nan() {
            0.0
        } else {
            self.min_confidence.clamp(0.0, 1.0)
        };
        FilterOptions { min_confidence }
    }
}
