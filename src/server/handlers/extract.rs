//! Extraction endpoint.
//!
//! The request body is the raw image and `Content-Type` is its declared MIME
//! type. Options come from the query string and fall back to the configured
//! defaults.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::super::AppState;
use crate::pipeline::{ErrorKind, ExtractOptions, ExtractionError, RawImage, Stage};

/// Query parameters for `POST /extract`.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractParams {
    /// Language packs separated by commas, plus signs or spaces, e.g. `eng,deu`.
    pub languages: Option<String>,
    pub min_confidence: Option<f32>,
    pub max_dimension: Option<u32>,
    pub denoise: Option<bool>,
    pub binarize: Option<bool>,
    pub deskew: Option<bool>,
}

impl ExtractParams {
    /// Overlay these parameters on `defaults`.
    pub fn apply(&self, defaults: &ExtractOptions) -> ExtractOptions {
        let mut options = defaults.clone();
        if let Some(ref languages) = self.languages {
            options.language_hints = languages
                // Query decoding turns a literal `+` into a space.
                .split(|c: char| c == ',' || c == '+' || c.is_whitespace())
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(min_confidence) = self.min_confidence {
            options.min_confidence = min_confidence;
        }
        if let Some(max_dimension) = self.max_dimension {
            options.max_dimension = max_dimension;
        }
        if let Some(denoise) = self.denoise {
            options.denoise = denoise;
        }
        if let Some(binarize) = self.binarize {
            options.binarize = binarize;
        }
        if let Some(deskew) = self.deskew {
            options.deskew = deskew;
        }
        options
    }
}

/// Error body returned by the API.
pub enum ApiError {
    Extraction(ExtractionError),
    BadRequest(String),
}

/// HTTP status for each failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::CorruptImage => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InputTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::PreprocessingError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UnsupportedLanguage => StatusCode::BAD_REQUEST,
        ErrorKind::RecognitionTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::RecognitionFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::PipelineTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::EngineSaturated => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Extraction(e) => (
                status_for(e.kind),
                Json(serde_json::json!({
                    "error_code": e.kind.as_str(),
                    "stage": e.stage.as_str(),
                    "message": e.cause,
                    "retryable": e.is_retryable(),
                })),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error_code": "InvalidRequest",
                    "stage": Stage::Received.as_str(),
                    "message": message,
                    "retryable": false,
                })),
            )
                .into_response(),
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(e: ExtractionError) -> Self {
        ApiError::Extraction(e)
    }
}

/// Run the pipeline on the request body.
pub async fn extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ExtractParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let body = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::Extraction(ExtractionError::input_too_large(e.body_text()))
        } else {
            ApiError::BadRequest(e.body_text())
        }
    })?;

    let declared_mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let options = params.apply(&state.defaults);
    let result = state
        .pipeline
        .extract(RawImage::new(body.to_vec(), declared_mime), &options)
        .await?;

    Ok(Json(result).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_overlay_defaults() {
        let params = ExtractParams {
            languages: Some("eng, deu+fra".to_string()),
            min_confidence: Some(0.8),
            deskew: Some(false),
            ..Default::default()
        };
        let options = params.apply(&ExtractOptions::default());

        assert_eq!(options.language_hints.len(), 3);
        assert!(options.language_hints.contains("fra"));
        assert_eq!(options.min_confidence, 0.8);
        assert!(!options.deskew);
        assert!(options.denoise);
    }

    #[test]
    fn test_params_split_decoded_plus() {
        let params = ExtractParams {
            languages: Some("deu eng".to_string()),
            ..Default::default()
        };
        let options = params.apply(&ExtractOptions::default());
        let languages: Vec<&str> = options.language_hints.iter().map(String::as_str).collect();
        assert_eq!(languages, vec!["deu", "eng"]);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(ErrorKind::UnsupportedFormat),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(ErrorKind::EngineSaturated),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorKind::PipelineTimeout),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
