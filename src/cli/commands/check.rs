//! Environment check command.

use console::style;

use ocrx::config::{CredentialStatus, Settings};
use ocrx::ocr::{OcrEngine, TesseractEngine};

/// Report engine availability, installed language packs and credentials.
pub async fn cmd_check(settings: &Settings, credentials: &CredentialStatus) -> anyhow::Result<()> {
    let engine = TesseractEngine::with_config(settings.pipeline.engine.clone());
    let mut ok = true;

    println!("{}", style("OCR engine").bold());
    if engine.is_available() {
        println!(
            "  {} {} ({})",
            style("✓").green(),
            engine.name(),
            settings.pipeline.engine.binary.display()
        );
        match engine.available_languages().await {
            Ok(languages) => {
                println!("  {} languages: {}", style("✓").green(), languages.join(", "));
                let default = &settings.pipeline.engine.default_language;
                if !default.split('+').all(|l| languages.iter().any(|i| i == l)) {
                    ok = false;
                    println!(
                        "  {} default language {} is not installed",
                        style("✗").red(),
                        default
                    );
                }
            }
            Err(e) => {
                ok = false;
                println!("  {} could not list languages: {}", style("✗").red(), e);
            }
        }
    } else {
        ok = false;
        println!(
            "  {} {} not found: {}",
            style("✗").red(),
            engine.name(),
            engine.availability_hint()
        );
    }

    println!("{}", style("Pipeline").bold());
    println!(
        "  request timeout {:?}, engine timeout {:?}",
        settings.pipeline.request_timeout, settings.pipeline.engine.timeout
    );
    println!(
        "  {} engine slot(s), {:?} overflow, max input {} bytes",
        settings.pipeline.max_concurrent.max(1),
        settings.pipeline.overflow,
        settings.pipeline.limits.max_input_bytes
    );

    println!("{}", style("Credentials").bold());
    let marker = match credentials {
        CredentialStatus::Present(_) => style("✓").green(),
        CredentialStatus::NotConfigured => style("-").dim(),
        _ => style("!").yellow(),
    };
    println!("  {} {}", marker, credentials);

    if !ok {
        anyhow::bail!("OCR engine is not ready");
    }
    Ok(())
}
