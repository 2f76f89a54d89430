//! Single entry point: decode, preprocess, recognize, aggregate.
//!
//! One end-to-end budget covers all four stages. Engine calls are capped by a
//! semaphore; requests over the cap either wait for a slot or are turned away
//! with `EngineSaturated`, depending on the overflow policy.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::aggregate::aggregate;
use super::decode::{DecodeLimits, Decoder};
use super::error::{ErrorKind, ExtractionError, Stage};
use super::preprocess::preprocess;
use super::state::{transition, Event, RequestState};
use super::types::{Diagnostics, ExtractOptions, ExtractionResult, RawImage};
use crate::ocr::{EngineConfig, OcrAdapter, OcrEngine};

/// Default end-to-end budget per request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// What to do with a request when every engine slot is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for a slot, bounded by the request timeout.
    #[default]
    Queue,
    /// Fail immediately with `EngineSaturated`.
    Reject,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(OverflowPolicy::Queue),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

/// Runtime configuration for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub request_timeout: Duration,
    /// Maximum simultaneous engine invocations.
    pub max_concurrent: usize,
    pub overflow: OverflowPolicy,
    pub limits: DecodeLimits,
    /// Parent directory for per-request scratch directories.
    pub scratch_root: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent: default_max_concurrent(),
            overflow: OverflowPolicy::default(),
            limits: DecodeLimits::default(),
            scratch_root: None,
            engine: EngineConfig::default(),
        }
    }
}

/// One engine slot per available core.
pub fn default_max_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Liveness snapshot. Building one has no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub engine: String,
    pub engine_slots: usize,
    pub engine_slots_busy: usize,
}

/// Tracks the lifecycle of one request so a timeout can name the stage it
/// interrupted.
struct Progress {
    state: Mutex<RequestState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: Mutex::new(RequestState::Received),
        }
    }

    fn apply(&self, event: Event) -> RequestState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = transition(*state, event);
        *state
    }

    fn advance(&self) {
        let state = self.apply(Event::Advance);
        if let Some(stage) = state.stage() {
            tracing::Span::current().record("stage", stage.as_str());
        }
        debug!(state = ?state, "Stage started");
    }

    fn current(&self) -> RequestState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The extraction pipeline. Cheap to share behind an `Arc`; holds no
/// per-request state.
pub struct Pipeline {
    decoder: Decoder,
    adapter: OcrAdapter,
    permits: Arc<Semaphore>,
    capacity: usize,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn OcrEngine>, config: PipelineConfig) -> Self {
        let capacity = config.max_concurrent.max(1);
        let adapter =
            OcrAdapter::new(engine, &config.engine).with_scratch_root(config.scratch_root.clone());

        Self {
            decoder: Decoder::new(config.limits),
            adapter,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        self.adapter.engine()
    }

    pub fn health(&self) -> HealthReport {
        let engine = self.engine();
        let available = engine.is_available();
        let busy = self.capacity - self.permits.available_permits().min(self.capacity);

        HealthReport {
            status: if available {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: if available {
                "API is running normally".to_string()
            } else {
                engine.availability_hint()
            },
            engine: engine.name().to_string(),
            engine_slots: self.capacity,
            engine_slots_busy: busy,
        }
    }

    /// Run one extraction request end to end.
    pub async fn extract(
        &self,
        raw: RawImage,
        options: &ExtractOptions,
    ) -> Result<ExtractionResult, ExtractionError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "extract",
            %request_id,
            bytes = raw.len(),
            stage = tracing::field::Empty
        );

        async move {
            let started = Instant::now();
            let progress = Progress::new();
            let budget = self.config.request_timeout;

            let outcome = match tokio::time::timeout(budget, self.run(raw, options, &progress)).await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    let stage = progress.current().stage().unwrap_or(Stage::Received);
                    Err(ExtractionError::new(
                        stage,
                        ErrorKind::PipelineTimeout,
                        format!("request exceeded {:?}", budget),
                    ))
                }
            };

            let elapsed = started.elapsed();
            match outcome {
                Ok(mut result) => {
                    result.duration_ms = elapsed.as_millis() as u64;
                    info!(
                        spans = result.spans.len(),
                        confidence = result.confidence,
                        duration_ms = result.duration_ms,
                        "Extraction finished"
                    );
                    Ok(result)
                }
                Err(e) => {
                    progress.apply(Event::Fail(e.kind));
                    warn!(
                        stage = %e.stage,
                        kind = %e.kind,
                        duration_ms = elapsed.as_millis() as u64,
                        "Extraction failed: {}",
                        e.cause
                    );
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        raw: RawImage,
        options: &ExtractOptions,
        progress: &Progress,
    ) -> Result<ExtractionResult, ExtractionError> {
        progress.advance();
        let decoder = self.decoder.clone();
        let (raster, digest) = tokio::task::spawn_blocking(move || {
            let digest = hex::encode(Sha256::digest(&raw.bytes));
            decoder
                .decode(&raw.bytes, &raw.declared_mime)
                .map(|raster| (raster, digest))
        })
        .await
        .map_err(|e| join_error(Stage::Decoding, e))??;
        let (source_width, source_height) = (raster.width(), raster.height());

        progress.advance();
        let preprocess_options = options.preprocess();
        let raster = tokio::task::spawn_blocking(move || preprocess(raster, &preprocess_options))
            .await
            .map_err(|e| join_error(Stage::Preprocessing, e))??;
        let transforms = raster.transforms().to_vec();

        progress.advance();
        let permit = if raster.is_uniform() {
            None
        } else {
            Some(self.acquire_slot().await?)
        };
        let spans = self
            .adapter
            .recognize(raster, &options.language_hints)
            .await?;
        drop(permit);

        progress.advance();
        let mut result = aggregate(spans, &options.filter());
        result.diagnostics = Diagnostics {
            source_width,
            source_height,
            transforms,
            engine: self.engine().name().to_string(),
            input_sha256: digest,
        };

        progress.advance();
        Ok(result)
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, ExtractionError> {
        match self.config.overflow {
            OverflowPolicy::Queue => {
                self.permits.clone().acquire_owned().await.map_err(|_| {
                    ExtractionError::recognition_failure("engine slots are shut down")
                })
            }
            OverflowPolicy::Reject => self.permits.clone().try_acquire_owned().map_err(|_| {
                ExtractionError::new(
                    Stage::Recognizing,
                    ErrorKind::EngineSaturated,
                    format!("all {} engine slots are busy", self.capacity),
                )
            }),
        }
    }
}

fn join_error(stage: Stage, e: tokio::task::JoinError) -> ExtractionError {
    let kind = match stage {
        Stage::Decoding => ErrorKind::CorruptImage,
        Stage::Preprocessing => ErrorKind::PreprocessingError,
        _ => ErrorKind::RecognitionFailure,
    };
    ExtractionError::new(stage, kind, format!("worker task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::FakeEngine;
    use crate::ocr::EngineWord;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_with_text_block() -> Vec<u8> {
        let img = GrayImage::from_fn(120, 60, |x, y| {
            if (20..100).contains(&x) && (20..32).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn word(text: &str, left: u32) -> EngineWord {
        EngineWord {
            text: text.to_string(),
            confidence: 0.9,
            left,
            top: 20,
            width: 30,
            height: 12,
        }
    }

    fn pipeline(engine: FakeEngine, config: PipelineConfig) -> Pipeline {
        Pipeline::new(Arc::new(engine), config)
    }

    #[tokio::test]
    async fn test_extract_fills_diagnostics() {
        let p = pipeline(
            FakeEngine::with_words(vec![word("hello", 20), word("there", 60)]),
            PipelineConfig::default(),
        );
        let bytes = png_with_text_block();
        let result = p
            .extract(RawImage::new(bytes.clone(), "image/png"), &ExtractOptions::default())
            .await
            .unwrap();

        assert_eq!(result.full_text, "hello there");
        assert_eq!(result.diagnostics.engine, "fake");
        assert_eq!(result.diagnostics.source_width, 120);
        assert_eq!(result.diagnostics.input_sha256, hex::encode(Sha256::digest(&bytes)));
        assert_eq!(result.diagnostics.input_sha256.len(), 64);
    }

    #[tokio::test]
    async fn test_decode_failure_carries_stage() {
        let p = pipeline(FakeEngine::with_words(vec![]), PipelineConfig::default());
        let err = p
            .extract(RawImage::new(vec![1, 2, 3], "image/png"), &ExtractOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Decoding);
        assert_eq!(err.kind, ErrorKind::CorruptImage);
    }

    #[tokio::test]
    async fn test_pipeline_timeout_names_stage() {
        let config = PipelineConfig {
            request_timeout: Duration::from_millis(100),
            ..PipelineConfig::default()
        };
        let p = pipeline(
            FakeEngine::with_words(vec![]).with_delay(Duration::from_secs(10)),
            config,
        );
        let err = p
            .extract(
                RawImage::new(png_with_text_block(), "image/png"),
                &ExtractOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PipelineTimeout);
        assert_eq!(err.stage, Stage::Recognizing);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_reports_engine() {
        let p = pipeline(FakeEngine::with_words(vec![]), PipelineConfig::default());
        let health = p.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.message, "API is running normally");
        assert_eq!(health.engine_slots_busy, 0);

        let p = pipeline(FakeEngine::unavailable(), PipelineConfig::default());
        assert_eq!(p.health().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!("queue".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Queue));
        assert_eq!("REJECT".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Reject));
        assert!("drop".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let config = PipelineConfig {
            max_concurrent: 0,
            ..PipelineConfig::default()
        };
        let p = pipeline(FakeEngine::with_words(vec![]), config);
        assert_eq!(p.health().engine_slots, 1);
    }
}
