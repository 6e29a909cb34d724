pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Recoverable failures of a watch job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("watch canceled")]
    Canceled,

    #[error("watch closed by peer")]
    Closed,

    #[error("failed to send op: {0}")]
    Send(#[source] BoxError),

    #[error("failed to receive request: {0}")]
    Recv(#[source] BoxError),

    #[error("invalid value: {0}")]
    Decode(#[from] prost::DecodeError),
}

// === impl Error ===

impl Error {
    pub fn send(error: impl Into<BoxError>) -> Self {
        Self::Send(error.into())
    }

    pub fn recv(error: impl Into<BoxError>) -> Self {
        Self::Recv(error.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
