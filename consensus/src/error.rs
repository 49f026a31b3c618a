use thiserror::Error;

/// Outcome of a direct block or transaction request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("peer does not have the requested object")]
    NotFound,
    #[error("connection closed before the request completed")]
    Closed,
}

/// Outcome of a proof or receipt request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ProofError {
    #[error("proof request timed out")]
    Timeout,
    #[error("peer declined to provide a proof")]
    Rejected,
    #[error("invalid proof: {0}")]
    Invalid(&'static str),
    #[error("peer version does not support this request")]
    Unsupported,
    #[error("connection closed before the request completed")]
    Closed,
}
