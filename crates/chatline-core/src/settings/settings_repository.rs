use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use super::engine_settings::EngineSettings;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Path error: {0}")]
    PathError(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub trait SettingsRepository: Send + Sync + 'static {
    /// Load settings from storage; defaults when nothing was saved yet.
    fn load(&self) -> BoxFuture<'static, SettingsResult<EngineSettings>>;

    fn save(&self, settings: EngineSettings) -> BoxFuture<'static, SettingsResult<()>>;
}
