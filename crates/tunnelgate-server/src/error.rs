use thiserror::Error;

/// Dispositions from spec §7. Each variant names the error kind the table
/// enumerates; how it's turned into a response/connection-teardown lives
/// in `dispatcher.rs`, not here.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no Host header present")]
    NoHost,

    #[error("no subdomain in Host header")]
    NoSubdomain,

    #[error("no active client for '{0}'")]
    UnknownSubdomain(String),

    #[error("pool drained before a socket could be lent")]
    PoolDrained,

    #[error("tunnel socket error: {0}")]
    TunnelSocketError(#[from] std::io::Error),

    #[error("invalid subdomain: {0}")]
    ManagementValidation(String),
}
