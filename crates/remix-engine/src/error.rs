use thiserror::Error;

/// Failures the workflow routes on. They travel inside `anyhow::Error` and
/// are recovered with `downcast_ref`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemixError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Channel not found.")]
    ChannelNotFound,
    #[error("Private channel.")]
    PrivateChannel,
    #[error("{0}")]
    FetchFailed(String),
    #[error("Could not process reference images.")]
    ReferencesUnavailable,
    #[error("API Key not found. Please select an API key first.")]
    MissingApiKey,
    #[error(
        "The model did not return an image part. This can happen if the references are too complex or trigger safety filters."
    )]
    NoImageReturned,
    #[error("Gemini request failed ({status}): {body}")]
    Service { status: u16, body: String },
}

/// 503, overload and rate-limit failures are worth another attempt.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    message.contains("503")
        || message.contains("429")
        || lower.contains("overloaded")
        || lower.contains("rate limit")
        || lower.contains("rate-limit")
}

pub fn is_permission_message(message: &str) -> bool {
    message.contains("403")
        || message.contains("PERMISSION_DENIED")
        || message.to_ascii_lowercase().contains("permission denied")
}
