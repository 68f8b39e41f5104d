use snafu::Location;

/// Internal error type shared by the actors and the services layer.
///
/// Mirrors the teacher's `ClewdrError`: most variants are plain
/// `thiserror`-derived messages, with actor communication failures carrying a
/// `snafu::Location` so a panic inside an actor can be traced back to the
/// call site that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no such session")]
    UnknownSession,

    #[error("cookie not found: {msg}")]
    UnexpectedNone { msg: &'static str },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("domain {0} is not known to the store")]
    DomainNotExists(String),

    #[error("channel already attached for this session")]
    ChannelInUse,

    #[error("failed to persist store: {0}")]
    Persistence(String),

    #[error("actor call failed at {loc}: {msg}")]
    RactorError { loc: Location, msg: String },
}

impl From<BrokerError> for crate::api::error::ApiError {
    fn from(e: BrokerError) -> Self {
        use crate::api::error::ApiError;
        match e {
            BrokerError::UnknownSession => ApiError::not_found("unknown session"),
            BrokerError::UnexpectedNone { msg } => ApiError::not_found(msg),
            BrokerError::MalformedInput(msg) => ApiError::malformed_input(msg),
            BrokerError::DomainNotExists(d) => {
                ApiError::malformed_input(format!("domain {d} is not known to the store"))
            }
            BrokerError::ChannelInUse => ApiError::conflict("channel already attached"),
            BrokerError::Persistence(msg) => ApiError::internal(msg),
            BrokerError::RactorError { msg, .. } => ApiError::internal(msg),
        }
    }
}
