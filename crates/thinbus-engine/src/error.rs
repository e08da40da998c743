use thinbus_message::{MemberKind, MessageError, MessageId};
use thinbus_transport::TransportError;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Native transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Identifier, signature or description error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// A value could not be converted for its signature position.
    #[error("argument {index}: {source}")]
    Argument { index: usize, source: MessageError },

    /// The request is malformed (missing fields, wrong arity, bad values).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The host named an action the bridge does not know.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// No registered object member matches the identifier.
    #[error("no registered member for message id {0}")]
    UnknownMember(MessageId),

    /// The member exists but this engine cannot invoke its kind.
    #[error("invoking {0} members is not supported")]
    UnsupportedMember(MemberKind),

    /// No object set has been registered yet.
    #[error("no objects registered")]
    ObjectsNotRegistered,

    /// The operation needs an established bus connection.
    #[error("not connected to a bus")]
    NotConnected,

    /// The peer answered with an error message.
    #[error("error reply received: {0}")]
    ErrorReply(String),

    /// The router refused a join-session request.
    #[error("failure joining session, reply code {0}")]
    JoinFailed(u32),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The background poller could not be started.
    #[error("failed to start poll loop: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
