/// Errors that can occur while decoding an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The message is not a JSON document.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The message is valid JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// The `type` field is absent or not a string.
    #[error("message has no string `type` field")]
    MissingType,

    /// A known envelope field has the wrong JSON type.
    #[error("invalid envelope field: {0}")]
    InvalidField(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
