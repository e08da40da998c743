use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thinbus_message::{Message, MessageInfo};
use tracing::debug;

/// Host-side handle that identifies which request a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb-{}", self.0)
    }
}

/// Successful result payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Header of the message that produced this result, if any.
    pub info: Option<MessageInfo>,
    pub values: Value,
}

impl Reply {
    /// A plain acknowledgement with no originating message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            info: None,
            values: Value::String(text.into()),
        }
    }

    /// Values decoded from `msg`.
    pub fn from_message(msg: &Message, values: Value) -> Self {
        Self {
            info: Some(msg.info()),
            values,
        }
    }

    /// Host encoding: `[messageInfo, values, null]`.
    pub fn to_json(&self) -> Value {
        let info = self
            .info
            .as_ref()
            .and_then(|info| serde_json::to_value(info).ok())
            .unwrap_or(Value::Null);
        json!([info, self.values, Value::Null])
    }
}

/// One result delivered to the host for a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub callback: CallbackId,
    pub outcome: Result<Reply, String>,
    /// More results may follow for the same callback.
    pub keep_callback: bool,
}

impl Completion {
    /// Final success.
    pub fn success(callback: CallbackId, reply: Reply) -> Self {
        Self {
            callback,
            outcome: Ok(reply),
            keep_callback: false,
        }
    }

    /// Success that keeps the callback registered for further results.
    pub fn progress(callback: CallbackId, reply: Reply) -> Self {
        Self {
            callback,
            outcome: Ok(reply),
            keep_callback: true,
        }
    }

    /// Final failure.
    pub fn failure(callback: CallbackId, error: impl fmt::Display) -> Self {
        Self {
            callback,
            outcome: Err(error.to_string()),
            keep_callback: false,
        }
    }

    /// Failure report that does not end the request.
    pub fn warning(callback: CallbackId, error: impl fmt::Display) -> Self {
        Self {
            callback,
            outcome: Err(error.to_string()),
            keep_callback: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Host encoding of the whole completion.
    pub fn to_json(&self) -> Value {
        match &self.outcome {
            Ok(reply) => json!({
                "callbackId": self.callback,
                "status": "ok",
                "keepCallback": self.keep_callback,
                "result": reply.to_json(),
            }),
            Err(message) => json!({
                "callbackId": self.callback,
                "status": "error",
                "keepCallback": self.keep_callback,
                "error": message,
            }),
        }
    }
}

/// Receives completions produced by requests and by the poll loop.
///
/// Called from the poll loop thread as well as from request callers.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, completion: Completion);
}

impl CompletionSink for std::sync::mpsc::Sender<Completion> {
    fn complete(&self, completion: Completion) {
        if let Err(err) = self.send(completion) {
            debug!(callback = %err.0.callback, "completion receiver dropped");
        }
    }
}

#[cfg(feature = "async")]
impl CompletionSink for tokio::sync::mpsc::UnboundedSender<Completion> {
    fn complete(&self, completion: Completion) {
        if let Err(err) = self.send(completion) {
            debug!(callback = %err.0.callback, "completion receiver dropped");
        }
    }
}
