/// Result type used by the wizard, the generation client and the compositor.
pub type ComicResult<T> = Result<T, ComicError>;

/// Error taxonomy surfaced by every user-initiated operation.
#[derive(thiserror::Error, Debug)]
pub enum ComicError {
    /// A local precondition failed before any external call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// The model call failed, or its answer did not satisfy the expected contract.
    #[error("generation error: {0}")]
    Generation(String),

    /// An image could not be decoded or there was nothing to composite.
    #[error("composition error: {0}")]
    Composition(String),

    /// Another generation operation currently holds the in-flight flag.
    #[error("another generation is already in progress")]
    Busy,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ComicError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    /// Wraps a transport-level failure, keeping the whole context chain in the message.
    pub fn from_transport(err: anyhow::Error) -> Self {
        Self::Generation(format!("{:#}", err))
    }
}
