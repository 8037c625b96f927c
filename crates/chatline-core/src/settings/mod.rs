pub mod engine_settings;
pub mod settings_json_repository;
pub mod settings_repository;

pub use engine_settings::EngineSettings;
pub use settings_json_repository::SettingsJsonRepository;
pub use settings_repository::{SettingsError, SettingsRepository, SettingsResult};
