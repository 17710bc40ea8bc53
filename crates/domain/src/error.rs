/// Shared error type used across all Portico crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("transport: {0}")]
    Transport(String),

    #[error("idle timeout after {0}s")]
    IdleTimeout(u64),

    #[error("channel lifetime exceeded after {0}s")]
    LifetimeExceeded(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for conditions the caller caused and can fix by changing the
    /// request, as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidSession(_) | Error::InvalidRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
