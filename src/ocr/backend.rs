//! OCR engine abstraction.
//!
//! The pipeline talks to recognition engines only through [`OcrEngine`], so
//! the Tesseract CLI backend can be swapped for an in-process engine or a
//! test double without touching the adapter.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from OCR engines.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not available: {0}")]
    NotAvailable(String),

    #[error("Language pack not installed: {0}")]
    UnsupportedLanguage(String),

    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine failed: {0}")]
    Failed(String),

    #[error("Malformed engine output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One word reported by an engine, in the coordinates of the image it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineWord {
    pub text: String,
    /// Confidence in [0, 1]; negative for structural rows with no text.
    pub confidence: f32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A single recognition call.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Image file on disk, owned by the caller's scratch directory.
    pub image_path: PathBuf,
    /// Language pack names, e.g. `eng`, `deu`.
    pub languages: Vec<String>,
    /// Tesseract-style page segmentation mode.
    pub page_segmentation: u8,
}

/// Trait for OCR engines.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine name recorded in diagnostics.
    fn name(&self) -> &str;

    /// Check if this engine is available (binaries installed, models present).
    fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this engine available.
    fn availability_hint(&self) -> String;

    /// Installed language packs.
    async fn available_languages(&self) -> Result<Vec<String>, EngineError>;

    /// Recognize words in an image file.
    ///
    /// Dropping the returned future must stop any work the engine started.
    async fn recognize(&self, request: &EngineRequest) -> Result<Vec<EngineWord>, EngineError>;
}

/// Default page segmentation: fully automatic, no orientation detection.
pub const DEFAULT_PAGE_SEGMENTATION: u8 = 3;

/// Default budget for one engine call.
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for OCR engines (binary, language, segmentation, budget).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine binary name or path.
    pub binary: PathBuf,
    /// Language used when a request carries no hints (e.g. "eng").
    pub default_language: String,
    pub page_segmentation: u8,
    /// Budget for a single engine call.
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            default_language: "eng".to_string(),
            page_segmentation: DEFAULT_PAGE_SEGMENTATION,
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }
}
