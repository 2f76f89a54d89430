//! Scripted engine for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{EngineError, EngineRequest, EngineWord, OcrEngine};

pub struct FakeEngine {
    words: Vec<EngineWord>,
    languages: Vec<String>,
    delay: Option<Duration>,
    failure: Option<String>,
    available: bool,
    calls: AtomicUsize,
    saw_image: AtomicBool,
    last_languages: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn with_words(words: Vec<EngineWord>) -> Self {
        Self {
            words,
            languages: vec!["eng".into(), "deu".into(), "osd".into()],
            delay: None,
            failure: None,
            available: true,
            calls: AtomicUsize::new(0),
            saw_image: AtomicBool::new(false),
            last_languages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::with_words(Vec::new())
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::with_words(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saw_image(&self) -> bool {
        self.saw_image.load(Ordering::SeqCst)
    }

    pub fn last_languages(&self) -> Vec<String> {
        self.last_languages.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn availability_hint(&self) -> String {
        if self.available {
            "fake engine ready".to_string()
        } else {
            "fake engine switched off".to_string()
        }
    }

    async fn available_languages(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.languages.clone())
    }

    async fn recognize(&self, request: &EngineRequest) -> Result<Vec<EngineWord>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_languages.lock().unwrap() = request.languages.clone();
        if request.image_path.exists() {
            self.saw_image.store(true, Ordering::SeqCst);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref message) = self.failure {
            return Err(EngineError::Failed(message.clone()));
        }
        Ok(self.words.clone())
    }
}
