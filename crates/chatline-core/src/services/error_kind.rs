use std::fmt;

use thiserror::Error;

/// Category of a failed completion, used to pick the user-facing hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Auth,
    RateLimit,
    Tls,
    ModelNotFound,
    Unknown,
}

impl ErrorKind {
    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Connection error",
            ErrorKind::Auth => "Authentication failed",
            ErrorKind::RateLimit => "Rate limit reached",
            ErrorKind::Tls => "Secure connection failed",
            ErrorKind::ModelNotFound => "Model not found",
            ErrorKind::Unknown => "Unexpected error",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::Network => {
                "Unable to reach the API server. Check your internet connection and the API URL."
            }
            ErrorKind::Auth => "Check that your API key is valid and has access to this endpoint.",
            ErrorKind::RateLimit => {
                "Too many requests or quota exhausted. Wait a moment or check your plan limits."
            }
            ErrorKind::Tls => {
                "The server certificate could not be verified. Check the API URL or disable TLS verification for self-hosted endpoints."
            }
            ErrorKind::ModelNotFound => {
                "The configured model is not available. Check the model name in settings."
            }
            ErrorKind::Unknown => "See the details below or the diagnostics log.",
        }
    }

    /// Map an HTTP status to a kind, when the status is specific enough.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(ErrorKind::Auth),
            404 => Some(ErrorKind::ModelNotFound),
            429 => Some(ErrorKind::RateLimit),
            _ => None,
        }
    }

    /// Keyword classification of a free-form error message.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["ssl", "certificate", "tls"]) {
            ErrorKind::Tls
        } else if has(&["unauthorized", "401", "api key", "authentication"]) {
            ErrorKind::Auth
        } else if has(&["quota", "rate limit", "too many requests", "429"]) {
            ErrorKind::RateLimit
        } else if has(&["connection", "timeout", "timed out", "unreachable", "dns"]) {
            ErrorKind::Network
        } else if has(&["model", "not found", "404"]) {
            ErrorKind::ModelNotFound
        } else {
            ErrorKind::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Failure reported by a [`CompletionTransport`](super::CompletionTransport).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a message alone, classifying it by keywords.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify_message(&message),
            message,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        let kind = if let Some(kind) = err.status().and_then(|s| ErrorKind::from_status(s.as_u16()))
        {
            kind
        } else if err.is_connect() || err.is_timeout() {
            // rustls failures surface as connect errors; keep the TLS hint when the text says so.
            match ErrorKind::classify_message(&format!("{err:?}")) {
                ErrorKind::Tls => ErrorKind::Tls,
                _ => ErrorKind::Network,
            }
        } else {
            ErrorKind::classify_message(&message)
        };
        Self { kind, message }
    }
}
