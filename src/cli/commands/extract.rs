//! One-shot extraction command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;

use ocrx::config::Settings;
use ocrx::ocr::TesseractEngine;
use ocrx::pipeline::{ExtractOptions, Pipeline, RawImage};
use ocrx::utils::{format_duration, format_size, guess_mime_for_path};

/// Run the pipeline on a single file and print the result.
pub async fn cmd_extract(
    settings: &Settings,
    file: &Path,
    mime: Option<&str>,
    options: &ExtractOptions,
    json: bool,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
    let mime = mime
        .map(str::to_string)
        .unwrap_or_else(|| guess_mime_for_path(file));

    let engine = Arc::new(TesseractEngine::with_config(settings.pipeline.engine.clone()));
    let pipeline = Pipeline::new(engine, settings.pipeline.clone());

    let size = bytes.len() as u64;
    let result = match pipeline.extract(RawImage::new(bytes, mime), options).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!(
                "{} {} failed at {}: {}",
                style("✗").red(),
                e.kind.as_str(),
                e.stage.as_str(),
                e.cause
            );
            if e.is_retryable() {
                eprintln!("  {}", style("This failure is transient; retrying may succeed").dim());
            }
            return Err(anyhow::anyhow!("Extraction failed: {}", e));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let transforms: Vec<&str> = result
        .diagnostics
        .transforms
        .iter()
        .map(|t| t.name())
        .collect();
    eprintln!(
        "{} {} ({}, {}x{}) in {}",
        style("✓").green(),
        file.display(),
        format_size(size),
        result.diagnostics.source_width,
        result.diagnostics.source_height,
        format_duration(Duration::from_millis(result.duration_ms)),
    );
    eprintln!(
        "  {} lines, {} spans, confidence {:.2}, transforms: {}",
        result.lines.len(),
        result.spans.len(),
        result.confidence,
        if transforms.is_empty() {
            "none".to_string()
        } else {
            transforms.join(", ")
        }
    );

    let hidden = result.spans.iter().filter(|s| s.below_threshold).count();
    if hidden > 0 {
        eprintln!(
            "  {} {} span(s) below --min-confidence {:.2}",
            style("!").yellow(),
            hidden,
            options.min_confidence
        );
    }

    println!("{}", result.full_text);
    Ok(())
}
