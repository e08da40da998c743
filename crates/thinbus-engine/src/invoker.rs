//! Outbound method calls.
//!
//! An invocation is fire-and-register: the call returns once the message is
//! handed to the native layer, and the reply reaches the caller's callback
//! later through the poll loop.

use serde_json::Value;
use thinbus_message::{MemberKind, Message, MessageId, Signature, TypeCode, APP_ID_FLAG};
use thinbus_transport::NativeBus;
use tracing::{debug, info, warn};

use crate::codec;
use crate::completion::{CallbackId, Completion, Reply};
use crate::connection::BusConnection;
use crate::error::{EngineError, Result};
use crate::registry::Continuation;

/// Session id that addresses this client's own objects.
pub const OWN_SESSION: u32 = 0;

/// A method call as requested by a host.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub session_id: u32,
    /// Unique or well-known bus name of the peer. Empty for the router's
    /// choice.
    pub destination: String,
    /// Object path to bind to the addressed proxy object before the call.
    pub path: Option<String>,
    pub id: MessageId,
    pub parameter_signature: Option<String>,
    pub parameters: Vec<Value>,
    pub out_signature: Option<String>,
}

impl InvokeRequest {
    pub fn new(session_id: u32, destination: impl Into<String>, id: MessageId) -> Self {
        Self {
            session_id,
            destination: destination.into(),
            path: None,
            id,
            parameter_signature: None,
            parameters: Vec::new(),
            out_signature: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_parameters(mut self, signature: impl Into<String>, parameters: Vec<Value>) -> Self {
        self.parameter_signature = Some(signature.into());
        self.parameters = parameters;
        self
    }

    pub fn with_out_signature(mut self, signature: impl Into<String>) -> Self {
        self.out_signature = Some(signature.into());
        self
    }

    /// Identifier used for member resolution and the outbound envelope.
    ///
    /// Session [`OWN_SESSION`] redirects the call to the local object list.
    pub fn target(&self) -> MessageId {
        if self.session_id == OWN_SESSION {
            self.id.with_list_index(APP_ID_FLAG)
        } else {
            self.id
        }
    }
}

impl<B: NativeBus> BusConnection<B> {
    /// Send a method call and register for its reply.
    ///
    /// Signatures and parameter values are validated before anything is
    /// sent. Returns the reply identifier the answer will carry.
    pub fn invoke(&self, callback: CallbackId, request: &InvokeRequest) -> Result<MessageId> {
        let in_signature = Signature::parse_optional(request.parameter_signature.as_deref())?;
        let out_signature = Signature::parse_optional(request.out_signature.as_deref())?;
        let args = match &in_signature {
            Some(signature) => codec::prepare_args(signature, &request.parameters)?,
            None => Vec::new(),
        };

        let id = request.target();
        if id != request.id {
            info!(requested = %request.id, resolved = %id, "session 0 addresses local objects");
        }

        let kind = self.with_objects(|table| {
            if table.local().is_empty() && table.proxy().is_empty() {
                return Err(EngineError::ObjectsNotRegistered);
            }
            table
                .resolve(id)
                .map(|resolved| resolved.member.kind)
                .ok_or(EngineError::UnknownMember(id))
        })?;

        if let Some(path) = request.path.as_deref().filter(|path| !path.is_empty()) {
            if let Err(err) = self.bus().set_proxy_object_path(id, path) {
                warn!(msg_id = %id, path, error = %err, "failed to bind proxy object path");
                self.complete(Completion::warning(
                    callback,
                    format!("failed to bind object path {path}: {err}"),
                ));
            }
        }

        match kind {
            MemberKind::Method => {}
            MemberKind::Signal | MemberKind::Property => {
                return Err(EngineError::UnsupportedMember(kind));
            }
        }

        let mut msg = self.bus().marshal_method_call(
            id,
            &request.destination,
            request.session_id,
            0,
            self.config().method_timeout,
        )?;
        if let Err(err) = codec::marshal_prepared(self.bus(), &mut msg, args) {
            self.bus().close_msg(&mut msg);
            return Err(err);
        }

        let reply_id = id.reply();
        self.arm(
            reply_id,
            Continuation::MethodReply {
                callback,
                out_signature,
            },
            || Ok(self.bus().deliver_msg(msg)?),
        )?;

        self.enable_polling();
        debug!(
            msg_id = %id,
            destination = %request.destination,
            session_id = request.session_id,
            "method call sent"
        );
        Ok(reply_id)
    }

    pub(crate) fn on_method_reply(
        &self,
        callback: CallbackId,
        out_signature: Option<&Signature>,
        msg: &mut Message,
    ) -> Result<Completion> {
        if msg.is_error() {
            let text = self.error_text(msg);
            debug!(msg_id = %msg.id, %callback, error = %text, "error reply");
            return Ok(Completion::failure(callback, EngineError::ErrorReply(text)));
        }

        let values = match out_signature {
            Some(signature) => codec::unmarshal_args(self.bus(), msg, signature)?,
            None => Vec::new(),
        };
        Ok(Completion::success(callback, Reply::from_message(msg, values.into())))
    }

    /// Error replies conventionally lead with a description string.
    fn error_text(&self, msg: &mut Message) -> String {
        let sender = msg.sender.clone().unwrap_or_else(|| "peer".to_string());
        let leads_with_string = msg
            .signature
            .as_deref()
            .is_some_and(|signature| signature.starts_with(TypeCode::String.as_char()));
        if leads_with_string {
            if let Ok(arg) = self.bus().unmarshal_arg(msg, TypeCode::String) {
                if let Some(text) = arg.as_str() {
                    return format!("{sender}: {text}");
                }
            }
        }
        format!("{sender} returned an error")
    }
}
