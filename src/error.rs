use thiserror::Error;

/// The abstract error kinds from the OSCQuery error-handling design.
///
/// Most of these map to an HTTP status at the handler boundary (see
/// `http::status_for`); the OSC-facing ones are logged and swallowed per the
/// "nothing in the tree mutation path is retried" policy.
#[derive(Debug, Error)]
pub enum OscQueryError {
    #[error("malformed OSC packet")]
    MalformedOsc,

    #[error("unknown path: {0}")]
    UnknownPath(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("invalid argument index {index} (node has {len} arguments)")]
    InvalidIndex { index: usize, len: usize },

    #[error("address family unsupported (not IPv4): {0}")]
    AddressFamilyUnsupported(String),

    #[error("OSC transport unsupported: {0}")]
    TransportUnsupported(String),

    #[error("failed to bind: {0}")]
    BindFailure(#[from] std::io::Error),

    #[error("discovery error: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, OscQueryError>;
