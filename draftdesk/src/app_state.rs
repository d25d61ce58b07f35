use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{Config, ConfigError};
use crate::generation::{GeminiBackend, GenerationClient, GenerationError};
use crate::session::EditorSession;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    session: Mutex<EditorSession>,
    /// `Err` when no credential is configured; generation endpoints report it.
    generation: Result<Arc<GenerationClient>, ConfigError>,
    max_attachment_bytes: usize,
}

impl AppState {
    pub fn new(
        generation: Result<GenerationClient, ConfigError>,
        max_attachment_bytes: usize,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                session: Mutex::new(EditorSession::new()),
                generation: generation.map(Arc::new),
                max_attachment_bytes,
            }),
        }
    }

    /// Build the Gemini-backed client. A missing key is not fatal.
    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        let generation = match GeminiBackend::from_config(config) {
            Ok(backend) => {
                tracing::info!(model = backend.model(), "Generation backend configured");
                Ok(GenerationClient::new(
                    Arc::new(backend),
                    config.generation.clone(),
                ))
            }
            Err(GenerationError::Config(error)) => {
                tracing::warn!(%error, "Generation disabled until a key is configured");
                Err(error)
            }
            Err(error) => return Err(error),
        };
        Ok(Self::new(generation, config.max_attachment_bytes))
    }

    pub fn session(&self) -> &Mutex<EditorSession> {
        &self.inner.session
    }

    pub fn generation(&self) -> Result<Arc<GenerationClient>, ConfigError> {
        self.inner.generation.clone()
    }

    pub fn max_attachment_bytes(&self) -> usize {
        self.inner.max_attachment_bytes
    }
}
