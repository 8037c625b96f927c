pub mod controllers;
pub mod exporters;
pub mod models;
pub mod render;
pub mod repositories;
pub mod services;
pub mod settings;

pub use controllers::{ConversationController, SubmitOutcome};
pub use settings::EngineSettings;
