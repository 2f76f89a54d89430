//! Pipeline error taxonomy.
//!
//! Every failure a request can hit is an [`ExtractionError`]: the stage that
//! was active, the [`ErrorKind`] callers branch on, and a readable cause.

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage a request is in (or failed in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Decoding,
    Preprocessing,
    Recognizing,
    Aggregating,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Decoding => "decoding",
            Stage::Preprocessing => "preprocessing",
            Stage::Recognizing => "recognizing",
            Stage::Aggregating => "aggregating",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What went wrong, independent of where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Declared MIME disagrees with the content, or the codec is unknown.
    UnsupportedFormat,
    /// Bytes looked like an image but could not be decoded.
    CorruptImage,
    /// Input exceeds the configured byte or dimension limits.
    InputTooLarge,
    /// Unrecoverable numeric failure while cleaning up the raster.
    PreprocessingError,
    /// The engine has no language pack for a requested language.
    UnsupportedLanguage,
    /// The engine call exceeded its own budget.
    RecognitionTimeout,
    /// Any other engine-reported failure.
    RecognitionFailure,
    /// The end-to-end request budget expired.
    PipelineTimeout,
    /// All engine slots busy and the overflow policy is to reject.
    EngineSaturated,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::CorruptImage => "CorruptImage",
            ErrorKind::InputTooLarge => "InputTooLarge",
            ErrorKind::PreprocessingError => "PreprocessingError",
            ErrorKind::UnsupportedLanguage => "UnsupportedLanguage",
            ErrorKind::RecognitionTimeout => "RecognitionTimeout",
            ErrorKind::RecognitionFailure => "RecognitionFailure",
            ErrorKind::PipelineTimeout => "PipelineTimeout",
            ErrorKind::EngineSaturated => "EngineSaturated",
        }
    }

    /// Whether the same request might succeed if the client sends it again.
    ///
    /// Input problems never heal on retry; load-related failures may.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RecognitionTimeout | ErrorKind::PipelineTimeout | ErrorKind::EngineSaturated
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal failure of one extraction request.
#[derive(Debug, Clone, Error)]
#[error("{kind} during {stage}: {cause}")]
pub struct ExtractionError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub cause: String,
}

impl ExtractionError {
    pub fn new(stage: Stage, kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            cause: cause.into(),
        }
    }

    pub fn unsupported_format(cause: impl Into<String>) -> Self {
        Self::new(Stage::Decoding, ErrorKind::UnsupportedFormat, cause)
    }

    pub fn corrupt_image(cause: impl Into<String>) -> Self {
        Self::new(Stage::Decoding, ErrorKind::CorruptImage, cause)
    }

    pub fn input_too_large(cause: impl Into<String>) -> Self {
        Self::new(Stage::Decoding, ErrorKind::InputTooLarge, cause)
    }

    pub fn preprocessing(cause: impl Into<String>) -> Self {
        Self::new(Stage::Preprocessing, ErrorKind::PreprocessingError, cause)
    }

    pub fn recognition_failure(cause: impl Into<String>) -> Self {
        Self::new(Stage::Recognizing, ErrorKind::RecognitionFailure, cause)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
