use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::paginator::{DEFAULT_VISIBLE_MESSAGES, MIN_VISIBLE_MESSAGES};
use crate::models::typing_indicator::DEFAULT_TYPING_LOOKBACK;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Everything the engine reads at startup. Missing fields fall back to defaults,
/// so older settings files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub verify_tls: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,

    pub max_displayed_messages: usize,
    pub typing_lookback: usize,
    pub min_submit_interval_ms: u64,
    pub render_throttle_ms: u64,
    pub worker_wait_timeout_ms: u64,
    pub auto_title: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            system_prompt: None,
            verify_tls: true,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            max_displayed_messages: DEFAULT_VISIBLE_MESSAGES,
            typing_lookback: DEFAULT_TYPING_LOOKBACK,
            min_submit_interval_ms: 1000,
            render_throttle_ms: 16,
            worker_wait_timeout_ms: 10_000,
            auto_title: true,
        }
    }
}

impl EngineSettings {
    /// Clamp values that would break invariants downstream.
    pub fn normalized(mut self) -> Self {
        self.max_displayed_messages = self.max_displayed_messages.max(MIN_VISIBLE_MESSAGES);
        self.typing_lookback = self.typing_lookback.max(1);
        // clamp passes NaN through.
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            DEFAULT_TEMPERATURE
        };
        self
    }

    pub fn min_submit_interval(&self) -> Duration {
        Duration::from_millis(self.min_submit_interval_ms)
    }

    pub fn render_throttle(&self) -> Duration {
        Duration::from_millis(self.render_throttle_ms)
    }

    pub fn worker_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_wait_timeout_ms)
    }
}
