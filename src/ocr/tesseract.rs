//! Tesseract OCR engine.
//!
//! Runs the `tesseract` CLI with TSV output and reads word-level rows back.
//! The child process is killed if the recognition future is dropped, so a
//! timed-out request stops consuming CPU.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use super::backend::{EngineConfig, EngineError, EngineRequest, EngineWord, OcrEngine};

/// TSV row level for individual words.
const WORD_LEVEL: &str = "5";

/// Tesseract OCR engine via command-line.
pub struct TesseractEngine {
    config: EngineConfig,
    languages: OnceCell<Vec<String>>,
}

impl TesseractEngine {
    /// Create a new Tesseract engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new Tesseract engine with custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            languages: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: io::Error) -> EngineError {
        if e.kind() == io::ErrorKind::NotFound {
            EngineError::NotAvailable(format!(
                "{} not found (install tesseract-ocr)",
                self.config.binary.display()
            ))
        } else {
            EngineError::Io(e)
        }
    }

    async fn list_languages(&self) -> Result<Vec<String>, EngineError> {
        let output = self
            .command()
            .arg("--list-langs")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed(format!(
                "tesseract --list-langs failed: {}",
                stderr.trim()
            )));
        }

        // Tesseract 3 prints the list on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut languages = parse_language_list(&stdout);
        if languages.is_empty() {
            languages = parse_language_list(&String::from_utf8_lossy(&output.stderr));
        }

        debug!(count = languages.len(), "Discovered tesseract languages");
        Ok(languages)
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        which::which(&self.config.binary).is_ok()
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "Tesseract is available".to_string()
        } else {
            "Tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        }
    }

    async fn available_languages(&self) -> Result<Vec<String>, EngineError> {
        let languages = self
            .languages
            .get_or_try_init(|| self.list_languages())
            .await?;
        Ok(languages.clone())
    }

    async fn recognize(&self, request: &EngineRequest) -> Result<Vec<EngineWord>, EngineError> {
        let languages = if request.languages.is_empty() {
            self.config.default_language.clone()
        } else {
            request.languages.join("+")
        };
        let psm = request.page_segmentation.to_string();

        let output = self
            .command()
            .arg(&request.image_path)
            .arg("stdout")
            .args(["-l", &languages])
            .args(["--psm", &psm])
            .arg("tsv")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Failed loading language") || stderr.contains("Error opening data file")
            {
                return Err(EngineError::UnsupportedLanguage(languages));
            }
            return Err(EngineError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_tsv(&stdout)
    }
}

/// Parse `tesseract ... tsv` output into word rows.
///
/// Non-word levels (page, block, paragraph, line) are skipped. Word rows keep
/// their raw confidence scaled from 0..100 to 0..1; `-1` stays negative.
pub fn parse_tsv(output: &str) -> Result<Vec<EngineWord>, EngineError> {
    let mut words = Vec::new();

    for (line_no, line) in output.lines().enumerate() {
        if line.is_empty() || line.starts_with("level") {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(EngineError::MalformedOutput(format!(
                "line {}: expected at least 11 columns, got {}",
                line_no + 1,
                fields.len()
            )));
        }
        if fields[0] != WORD_LEVEL {
            continue;
        }

        let number = |idx: usize| -> Result<u32, EngineError> {
            fields[idx].trim().parse::<u32>().map_err(|_| {
                EngineError::MalformedOutput(format!(
                    "line {}: bad number {:?}",
                    line_no + 1,
                    fields[idx]
                ))
            })
        };
        let raw_confidence: f32 = fields[10].trim().parse().map_err(|_| {
            EngineError::MalformedOutput(format!(
                "line {}: bad confidence {:?}",
                line_no + 1,
                fields[10]
            ))
        })?;

        words.push(EngineWord {
            // Text may itself contain tabs in rare cases.
            text: fields.get(11..).map(|t| t.join("\t")).unwrap_or_default(),
            confidence: if raw_confidence < 0.0 {
                raw_confidence
            } else {
                (raw_confidence / 100.0).min(1.0)
            },
            left: number(6)?,
            top: number(7)?,
            width: number(8)?,
            height: number(9)?,
        });
    }

    Ok(words)
}

/// Parse `tesseract --list-langs` output.
pub fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .filter(|l| !l.contains(' '))
        .map(str::to_string)
        .collect()
}
