//! OCR engines and the adapter that feeds them.
//!
//! ## Engines
//!
//! - **Tesseract**: the `tesseract` CLI with TSV output (default)
//!
//! Anything implementing [`OcrEngine`] can be handed to the pipeline.

mod adapter;
mod backend;
mod tesseract;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::OcrAdapter;
pub use backend::{
    EngineConfig, EngineError, EngineRequest, EngineWord, OcrEngine, DEFAULT_ENGINE_TIMEOUT,
    DEFAULT_PAGE_SEGMENTATION,
};
pub use tesseract::{parse_language_list, parse_tsv, TesseractEngine};
