use tracing::debug;

use super::error_kind::TransportError;
use super::llm_service::{ChatMessage, CompletionRequest, CompletionTransport};

pub const DEFAULT_TITLE: &str = "New session";

/// Longest title derived locally from the first message, before the ellipsis.
pub const AUTO_TITLE_MAX_LENGTH: usize = 50;

const TITLE_PROMPT: &str = "Generate a short title (maximum 8 words) in the same language as the user message that summarizes the following message. Reply ONLY with the title, nothing else:\n\n";
const TITLE_SOURCE_MAX_CHARS: usize = 500;
const TITLE_TEMPERATURE: f32 = 0.3;
const TITLE_MAX_TOKENS: u32 = 30;
const GENERATED_TITLE_MAX_CHARS: usize = 100;

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Provisional title used the moment a conversation is created from a message.
pub fn title_from_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let first_line = trimmed.lines().next().unwrap_or(trimmed).trim();
    let truncated = truncate_chars(first_line, AUTO_TITLE_MAX_LENGTH);
    if truncated.len() < first_line.len() {
        format!("{}...", truncated.trim_end())
    } else {
        first_line.to_string()
    }
}

fn clean_title(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '«' | '»' | '“' | '”'))
        .trim();

    if cleaned.is_empty() {
        return None;
    }
    let truncated = truncate_chars(cleaned, GENERATED_TITLE_MAX_CHARS);
    if truncated.len() < cleaned.len() {
        Some(format!("{}...", truncated.trim_end()))
    } else {
        Some(cleaned.to_string())
    }
}

/// Ask the model for a short title summarising `user_message`.
///
/// Returns `Ok(None)` when the model replies with nothing usable.
pub async fn generate_title(
    transport: &dyn CompletionTransport,
    model: &str,
    user_message: &str,
) -> Result<Option<String>, TransportError> {
    let prompt = format!(
        "{TITLE_PROMPT}{}",
        truncate_chars(user_message.trim(), TITLE_SOURCE_MAX_CHARS)
    );
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::new("user", prompt)],
        temperature: TITLE_TEMPERATURE,
        max_tokens: Some(TITLE_MAX_TOKENS),
    };

    let reply = transport.complete(request).await?;
    let title = clean_title(&reply);
    debug!(raw = %reply, cleaned = ?title, "Title generated");
    Ok(title)
}
