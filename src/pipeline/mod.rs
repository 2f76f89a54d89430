//! Image to text extraction pipeline.
//!
//! Stages run strictly in order for each request:
//!
//! 1. `decode`: bytes to an upright 8-bit luminance raster
//! 2. `preprocess`: downscale, denoise, binarize, deskew
//! 3. recognition via [`crate::ocr::OcrAdapter`]
//! 4. `aggregate`: reading order, lines, confidence filtering
//!
//! [`Pipeline`] sequences them under one request budget.

pub mod aggregate;
pub mod decode;
pub mod error;
pub mod orchestrator;
pub mod preprocess;
pub mod state;
pub mod types;

pub use aggregate::aggregate;
pub use decode::{decode, DecodeLimits, Decoder, DEFAULT_MAX_INPUT_BYTES};
pub use error::{ErrorKind, ExtractionError, Stage};
pub use orchestrator::{
    HealthReport, HealthStatus, OverflowPolicy, Pipeline, PipelineConfig, DEFAULT_REQUEST_TIMEOUT,
};
pub use preprocess::preprocess;
pub use state::{transition, Event, RequestState};
pub use types::{
    BoundingBox, Diagnostics, ExtractOptions, ExtractionResult, FilterOptions, NormalizedRaster,
    PreprocessOptions, PreprocessedRaster, RawImage, RecognizedSpan, TextLine, Transform,
};
