//! Web server command.

use std::sync::Arc;

use console::style;

use ocrx::config::{parse_bind_address, Settings};
use ocrx::ocr::{OcrEngine, TesseractEngine};
use ocrx::server::AppState;

/// Start the web server.
pub async fn cmd_serve(settings: &Settings, bind: Option<&str>) -> anyhow::Result<()> {
    let addr = match bind {
        Some(bind) => parse_bind_address(bind)?,
        None => settings.bind_addr()?,
    };

    let engine = Arc::new(TesseractEngine::with_config(settings.pipeline.engine.clone()));
    if engine.is_available() {
        println!("  {} {} found", style("✓").green(), engine.name());
    } else {
        // Still serve: /health reports the problem to the orchestrator.
        eprintln!(
            "  {} {} not available: {}",
            style("!").yellow(),
            engine.name(),
            engine.availability_hint()
        );
    }

    println!(
        "{} Starting OCR server at http://{} ({} engine slot(s), {:?} overflow)",
        style("→").cyan(),
        addr,
        settings.pipeline.max_concurrent.max(1),
        settings.pipeline.overflow,
    );
    println!("  Press Ctrl+C to stop");

    let state = AppState::new(settings, engine);
    ocrx::server::serve(state, addr).await
}
