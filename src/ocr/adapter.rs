//! Bridges preprocessed rasters and an [`OcrEngine`].
//!
//! Each call writes the raster as a PNG into its own scratch directory, asks
//! the engine for words, and maps the word boxes back onto the decoded source
//! raster. The scratch directory is removed on every exit path, including
//! when the caller drops the future.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, ImageFormat};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::backend::{EngineConfig, EngineError, EngineRequest, EngineWord, OcrEngine};
use crate::pipeline::error::{ErrorKind, ExtractionError, Stage};
use crate::pipeline::types::{BoundingBox, PreprocessedRaster, RasterGeometry, RecognizedSpan};

const SCRATCH_IMAGE: &str = "page.png";

pub struct OcrAdapter {
    engine: Arc<dyn OcrEngine>,
    default_language: String,
    page_segmentation: u8,
    engine_timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl OcrAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>, config: &EngineConfig) -> Self {
        Self {
            engine,
            default_language: config.default_language.clone(),
            page_segmentation: config.page_segmentation,
            engine_timeout: config.timeout,
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        &self.engine
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Recognize text in a preprocessed raster.
    ///
    /// Returns spans in source-raster coordinates, in engine order. A uniform
    /// raster yields no spans without consulting the engine.
    pub async fn recognize(
        &self,
        raster: PreprocessedRaster,
        language_hints: &BTreeSet<String>,
    ) -> Result<Vec<RecognizedSpan>, ExtractionError> {
        if raster.is_uniform() {
            debug!("Uniform raster, nothing to recognize");
            return Ok(Vec::new());
        }

        let languages = self.resolve_languages(language_hints)?;
        let (image, _, geometry) = raster.into_parts();

        let budget = self.engine_timeout;
        let words = tokio::time::timeout(budget, async {
            self.check_languages(&languages).await?;

            // Owned by this future so a timeout or drop removes it at once.
            let scratch = create_scratch_dir(self.scratch_root.as_deref())?;
            let png = tokio::task::spawn_blocking(move || encode_png(image))
                .await
                .map_err(|e| {
                    ExtractionError::recognition_failure(format!("png encoder panicked: {}", e))
                })??;
            let image_path = scratch.path().join(SCRATCH_IMAGE);
            tokio::fs::write(&image_path, &png).await.map_err(|e| {
                ExtractionError::recognition_failure(format!(
                    "failed to write scratch image: {}",
                    e
                ))
            })?;

            let request = EngineRequest {
                image_path,
                languages: languages.clone(),
                page_segmentation: self.page_segmentation,
            };
            let words = self
                .engine
                .recognize(&request)
                .await
                .map_err(engine_error);

            if let Err(e) = scratch.close() {
                warn!("Failed to remove scratch directory: {}", e);
            }
            words
        })
        .await
        .map_err(|_| {
            ExtractionError::new(
                Stage::Recognizing,
                ErrorKind::RecognitionTimeout,
                format!("{} exceeded {:?}", self.engine.name(), budget),
            )
        })??;

        let spans = words_to_spans(words, &geometry);
        debug!(
            engine = self.engine.name(),
            spans = spans.len(),
            "Recognition finished"
        );
        Ok(spans)
    }

    /// Expand hints into engine language names; empty means the default.
    fn resolve_languages(
        &self,
        language_hints: &BTreeSet<String>,
    ) -> Result<Vec<String>, ExtractionError> {
        let split = |hint: &str| -> Vec<String> {
            hint.split(|c: char| c == '+' || c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut languages: Vec<String> = language_hints.iter().flat_map(|h| split(h)).collect();
        if languages.is_empty() {
            languages = split(&self.default_language);
        }
        languages.sort();
        languages.dedup();

        if let Some(bad) = languages
            .iter()
            .find(|l| !l.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ExtractionError::new(
                Stage::Recognizing,
                ErrorKind::UnsupportedLanguage,
                format!("invalid language name {:?}", bad),
            ));
        }

        Ok(languages)
    }

    async fn check_languages(&self, languages: &[String]) -> Result<(), ExtractionError> {
        let installed = self
            .engine
            .available_languages()
            .await
            .map_err(engine_error)?;

        let missing: Vec<&str> = languages
            .iter()
            .filter(|l| !installed.contains(*l))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExtractionError::new(
                Stage::Recognizing,
                ErrorKind::UnsupportedLanguage,
                format!("language pack not installed: {}", missing.join(", ")),
            ))
        }
    }
}

fn create_scratch_dir(root: Option<&Path>) -> Result<TempDir, ExtractionError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("ocrx-");
    match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(|e| {
        ExtractionError::recognition_failure(format!("failed to create scratch directory: {}", e))
    })
}

/// Encode in memory; nothing touches the filesystem until the bytes are ready.
fn encode_png(image: GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| {
            ExtractionError::recognition_failure(format!("failed to encode page: {}", e))
        })?;
    Ok(buf.into_inner())
}

fn engine_error(e: EngineError) -> ExtractionError {
    let kind = match &e {
        EngineError::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
        EngineError::Timeout(_) => ErrorKind::RecognitionTimeout,
        _ => ErrorKind::RecognitionFailure,
    };
    ExtractionError::new(Stage::Recognizing, kind, e.to_string())
}

/// Drop structural rows and map word boxes into source coordinates.
fn words_to_spans(words: Vec<EngineWord>, geometry: &RasterGeometry) -> Vec<RecognizedSpan> {
    words
        .into_iter()
        .filter(|w| !w.text.trim().is_empty() && w.confidence >= 0.0)
        .enumerate()
        .map(|(i, w)| {
            let bbox = BoundingBox::new(w.left, w.top, w.width, w.height);
            RecognizedSpan {
                text: w.text,
                confidence: w.confidence.min(1.0),
                bbox: geometry.to_source(&bbox),
                reading_order: i,
                below_threshold: false,
            }
        })
        .collect()
}
