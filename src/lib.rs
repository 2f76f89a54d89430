//! ocrx - image to structured text extraction.
//!
//! Accepts an encoded image, normalizes it, runs it through an OCR engine and
//! returns positioned spans, reading-order lines and the flattened text.
//!
//! - [`pipeline`]: decoder, preprocessor, aggregator and the request orchestrator
//! - [`ocr`]: engine trait, the Tesseract backend and the recognition adapter
//! - [`server`]: HTTP surface
//! - [`config`]: config file discovery and environment overrides

pub mod config;
pub mod ocr;
pub mod pipeline;
pub mod server;
pub mod utils;
