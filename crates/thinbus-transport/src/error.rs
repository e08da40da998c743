/// Errors reported by the native bus layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No frame arrived within the unmarshal wait.
    #[error("timed out waiting for bus traffic")]
    Timeout,

    /// A frame arrived but matched no registered rule or object.
    #[error("inbound message matched no rule")]
    NoMatch,

    /// Router discovery or the connect handshake failed.
    #[error("failed to connect to bus: {0}")]
    Connect(String),

    /// An operation needs a live bus connection.
    #[error("not connected to a bus")]
    NotConnected,

    /// The message has no argument left to read.
    #[error("no more arguments in message")]
    EndOfArgs,

    /// The next argument does not have the requested type.
    #[error("argument type mismatch: expected '{expected}', found '{found}'")]
    ArgMismatch { expected: char, found: char },

    /// The native layer rejected a request.
    #[error("bus request failed: {0}")]
    Failure(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
