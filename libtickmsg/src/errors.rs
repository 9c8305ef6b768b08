use thiserror::Error;

/// Faults raised synchronously to the caller. These are programming or setup mistakes, as opposed to the
/// terminal conditions recorded in an [`crate::ErrorState`].
#[derive(Error, Debug)]
pub enum TickMsgError {
    #[error("Message size overflow: msg_id={msg_id} size={size} max_size={max_size}")]
    MessageSizeOverflow { msg_id: String, size: usize, max_size: usize },
    #[error("Could not encode message {msg_id}. {reason}")]
    EncodeMessage { msg_id: String, reason: String },
    #[error("Can't register message handler with duplicate id '{0}'.")]
    DuplicateHandler(String),
    #[error("No address has been configured for {0}.")]
    MissingAddress(&'static str),
    #[error("The endpoint is already started.")]
    AlreadyStarted,
    #[error("I/O error. {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures reported by a [`crate::MessageCodec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("Encoding failed. {0}")]
    Encode(String),
    /// The bytes could not be deserialized at all.
    #[error("Decoding failed. {0}")]
    Decode(String),
    /// The bytes were deserialized, but did not describe an `(id, payload)` pair.
    #[error("Invalid message format. {0}")]
    Format(String),
}

impl CodecError {
    pub fn encode(msg: impl Into<String>) -> Self {
        CodecError::Encode(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        CodecError::Decode(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        CodecError::Format(msg.into())
    }
}
