use thiserror::Error;

/// Failures reported by a [`MediaSource`](crate::source::MediaSource).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The platform media-session registry cannot be reached.
    #[error("media source unavailable: {0}")]
    Unavailable(String),

    /// Nothing is attached right now. A valid state, not a fault.
    #[error("no active media session")]
    NoActiveSession,

    #[error("player lookup failed: {0}")]
    Lookup(String),

    #[error("platform call failed: {0}")]
    Platform(String),

    #[error("artwork stream error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SourceError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for SourceError {
    fn from(value: windows::core::Error) -> Self {
        Self::Platform(format!("{value:?}"))
    }
}

#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("failed to read artwork stream: {0}")]
    Read(#[from] SourceError),

    #[error("artwork stream was empty")]
    Empty,

    #[error("failed to decode artwork: {0}")]
    Decode(#[from] image::ImageError),

    #[error("decode task failed: {0}")]
    Join(String),
}
