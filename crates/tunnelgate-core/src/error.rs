use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel already started")]
    AlreadyStarted,

    #[error("tunnel is closing or has ended")]
    NotListening,

    #[error("socket cap reached: {0} sockets already pooled")]
    CapReached(usize),

    #[error("invalid client id: {0}")]
    InvalidId(String),

    #[error("no client id available after {0} attempts")]
    IdExhausted(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
