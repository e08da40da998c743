//! Advertised-name discovery and session negotiation.
//!
//! ```text
//! Idle -> Discovering -> Found -> Joining -> Joined
//!                                        \-> JoinFailed
//! ```
//!
//! A join may also be issued straight from `Idle` when the peer name is
//! already known.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use thinbus_message::{Message, MessageId, Signature, TypeCode};
use thinbus_transport::{FindOp, NativeBus};
use tracing::{debug, info};

use crate::codec;
use crate::completion::{CallbackId, Completion, Reply};
use crate::connection::BusConnection;
use crate::error::{EngineError, Result};
use crate::registry::Continuation;

/// Reply codes carried by a join-session reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum JoinReplyCode {
    Success = 1,
    NoSession = 2,
    Unreachable = 3,
    ConnectFailed = 4,
    Rejected = 5,
    BadSessionOpts = 6,
    AlreadyJoined = 7,
    Failed = 8,
}

impl JoinReplyCode {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => JoinReplyCode::Success,
            2 => JoinReplyCode::NoSession,
            3 => JoinReplyCode::Unreachable,
            4 => JoinReplyCode::ConnectFailed,
            5 => JoinReplyCode::Rejected,
            6 => JoinReplyCode::BadSessionOpts,
            7 => JoinReplyCode::AlreadyJoined,
            8 => JoinReplyCode::Failed,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for JoinReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinReplyCode::Success => "SUCCESS",
            JoinReplyCode::NoSession => "NO_SESSION",
            JoinReplyCode::Unreachable => "UNREACHABLE",
            JoinReplyCode::ConnectFailed => "CONNECT_FAILED",
            JoinReplyCode::Rejected => "REJECTED",
            JoinReplyCode::BadSessionOpts => "BAD_SESSION_OPTS",
            JoinReplyCode::AlreadyJoined => "ALREADY_JOINED",
            JoinReplyCode::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Where session negotiation stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Discovering {
        service_name: String,
    },
    Found {
        name: String,
        sender: Option<String>,
    },
    Joining {
        name: String,
        port: u16,
    },
    Joined {
        session_id: u32,
        name: String,
    },
    JoinFailed {
        name: String,
        reply_code: Option<u32>,
    },
}

/// Holds the negotiation state of one connection.
#[derive(Debug, Default)]
pub struct SessionCoordinator {
    state: Mutex<SessionState>,
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.guard().clone()
    }

    fn transition(&self, next: SessionState) {
        self.replace(next);
    }

    /// Move to `next`, returning the state left behind.
    fn replace(&self, next: SessionState) -> SessionState {
        let mut state = self.guard();
        debug!(from = ?*state, to = ?next, "session state change");
        std::mem::replace(&mut *state, next)
    }

    /// Begin a request that moves to `next`; a failed `send` restores the
    /// previous state.
    fn begin<T>(&self, next: SessionState, send: impl FnOnce() -> Result<T>) -> Result<T> {
        let previous = self.replace(next);
        send().inspect_err(|_| self.transition(previous))
    }

    fn end_discovery(&self) {
        let mut state = self.guard();
        if matches!(*state, SessionState::Discovering { .. }) {
            *state = SessionState::Idle;
        }
    }

    /// A found-name signal only advances an active discovery.
    fn found(&self, name: &str, sender: Option<&str>) {
        let mut state = self.guard();
        if matches!(*state, SessionState::Discovering { .. }) {
            *state = SessionState::Found {
                name: name.to_string(),
                sender: sender.map(str::to_string),
            };
        }
    }
}

impl<B: NativeBus> BusConnection<B> {
    /// Ask the router for names matching `service_name`.
    ///
    /// The first matching advertisement is reported to `callback`; later ones
    /// need another call.
    pub fn start_discovery(&self, callback: CallbackId, service_name: &str) -> Result<()> {
        if service_name.is_empty() {
            return Err(EngineError::InvalidRequest(
                "service name must not be empty".to_string(),
            ));
        }

        let discovering = SessionState::Discovering {
            service_name: service_name.to_string(),
        };
        self.arm(
            MessageId::FOUND_ADVERTISED_NAME,
            Continuation::FoundAdvertisedName { callback },
            || {
                self.sessions().begin(discovering, || {
                    Ok(self.bus().find_advertised_name(service_name, FindOp::Start)?)
                })
            },
        )?;
        self.enable_polling();
        info!(service_name, "started advertised name discovery");
        Ok(())
    }

    /// Send a join request; the outcome is reported to `callback` once the
    /// router replies.
    pub fn join_session(&self, callback: CallbackId, name: &str, port: u16) -> Result<()> {
        if name.is_empty() {
            return Err(EngineError::InvalidRequest(
                "session host name must not be empty".to_string(),
            ));
        }

        let joining = SessionState::Joining {
            name: name.to_string(),
            port,
        };
        self.arm(
            MessageId::JOIN_SESSION.reply(),
            Continuation::JoinSession {
                callback,
                name: name.to_string(),
            },
            || {
                self.sessions()
                    .begin(joining, || Ok(self.bus().join_session(name, port)?))
            },
        )?;
        self.enable_polling();
        info!(name, port, "join session requested");
        Ok(())
    }

    /// Stop looking for `service_name`. Returns whether a discovery was
    /// still waiting for an advertisement; that request is dropped.
    pub fn stop_discovery(&self, service_name: &str) -> Result<bool> {
        if service_name.is_empty() {
            return Err(EngineError::InvalidRequest(
                "service name must not be empty".to_string(),
            ));
        }

        self.bus().find_advertised_name(service_name, FindOp::Stop)?;
        let pending = self
            .registry()
            .take_and_remove(MessageId::FOUND_ADVERTISED_NAME)
            .is_some();
        self.sessions().end_discovery();
        info!(service_name, pending, "stopped advertised name discovery");
        Ok(pending)
    }

    /// Leave `session_id` and return to idle.
    pub fn leave_session(&self, session_id: u32) -> Result<()> {
        self.bus().leave_session(session_id)?;
        self.sessions().transition(SessionState::Idle);
        info!(session_id, "left session");
        Ok(())
    }

    pub(crate) fn on_found_advertised_name(
        &self,
        callback: CallbackId,
        msg: &mut Message,
    ) -> Result<Completion> {
        let arg = self.bus().unmarshal_arg(msg, TypeCode::String)?;
        let name = arg.as_str().unwrap_or_default().to_string();
        info!(name = %name, sender = ?msg.sender, "found advertised name");

        self.sessions().found(&name, msg.sender.as_deref());
        let values = json!({ "name": name, "sender": msg.sender });
        Ok(Completion::progress(callback, Reply::from_message(msg, values)))
    }

    pub(crate) fn on_join_reply(
        &self,
        callback: CallbackId,
        name: &str,
        msg: &mut Message,
    ) -> Result<Completion> {
        if msg.is_error() {
            self.sessions().transition(SessionState::JoinFailed {
                name: name.to_string(),
                reply_code: None,
            });
            return Ok(Completion::failure(
                callback,
                EngineError::ErrorReply(format!("join session to {name} refused by router")),
            ));
        }

        let signature = Signature::parse("uu")?;
        let fields = codec::unmarshal_args(self.bus(), msg, &signature)?;
        let reply_code = u32_field(&fields, 0)?;
        let decoded_id = u32_field(&fields, 1)?;
        debug!(reply_code, session_id = decoded_id, "join session reply");

        let session_id = match JoinReplyCode::from_code(reply_code) {
            Some(JoinReplyCode::Success) => decoded_id,
            // The session we already hold is the one named by the header.
            Some(JoinReplyCode::AlreadyJoined) => msg.session_id,
            other => {
                info!(
                    name,
                    reply_code,
                    reason = ?other,
                    "join session failed"
                );
                self.sessions().transition(SessionState::JoinFailed {
                    name: name.to_string(),
                    reply_code: Some(reply_code),
                });
                return Ok(Completion::failure(callback, EngineError::JoinFailed(reply_code)));
            }
        };

        info!(name, session_id, "joined session");
        self.sessions().transition(SessionState::Joined {
            session_id,
            name: name.to_string(),
        });
        Ok(Completion::success(
            callback,
            Reply::from_message(msg, json!([session_id, name])),
        ))
    }
}

fn u32_field(fields: &[Value], index: usize) -> Result<u32> {
    fields
        .get(index)
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| {
            EngineError::InvalidRequest(format!("join reply field {index} is not a uint32"))
        })
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};

    use std::time::Duration;

    use thinbus_message::{Argument, MessageKind};
    use thinbus_transport::{BusCall, LoopbackBus, Operation, TransportError};

    use super::*;
    use crate::config::{EngineConfig, PollConfig};
    use crate::poll::PollLoop;

    fn connection() -> (BusConnection<LoopbackBus>, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel();
        let conn = BusConnection::new(
            Arc::new(LoopbackBus::connected()),
            EngineConfig::default(),
            Arc::new(tx),
        );
        (conn, rx)
    }

    fn join_reply(code: u32, session_id: u32) -> Message {
        Message::method_reply(MessageId::JOIN_SESSION)
            .with_arg(Argument::UInt32(code))
            .with_arg(Argument::UInt32(session_id))
    }

    #[test]
    fn reply_codes_round_trip() {
        for code in 1..=8 {
            assert_eq!(JoinReplyCode::from_code(code).unwrap().code(), code);
        }
        assert!(JoinReplyCode::from_code(0).is_none());
        assert_eq!(JoinReplyCode::AlreadyJoined.to_string(), "ALREADY_JOINED");
    }

    #[test]
    fn discovery_registers_and_enables_polling() {
        let (conn, _rx) = connection();
        conn.start_discovery(CallbackId(1), "com.example").unwrap();

        assert!(conn.registry().contains(MessageId::FOUND_ADVERTISED_NAME));
        assert!(conn.polling_enabled());
        assert_eq!(
            conn.session_state(),
            SessionState::Discovering {
                service_name: "com.example".into()
            }
        );
        assert_eq!(
            conn.bus().calls(),
            vec![BusCall::FindAdvertisedName {
                prefix: "com.example".into(),
                op: FindOp::Start
            }]
        );
    }

    #[test]
    fn rejected_discovery_leaves_registry_untouched() {
        let (conn, _rx) = connection();
        conn.bus().fail_next(
            thinbus_transport::Operation::FindAdvertisedName,
            TransportError::Failure("busy".into()),
        );

        assert!(conn.start_discovery(CallbackId(1), "com.example").is_err());
        assert!(conn.registry().is_empty());
        assert!(!conn.polling_enabled());
        assert_eq!(conn.session_state(), SessionState::Idle);
        assert!(matches!(
            conn.start_discovery(CallbackId(1), ""),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn found_name_reports_name_and_sender() {
        let (conn, _rx) = connection();
        conn.start_discovery(CallbackId(3), "com.example").unwrap();
        let mut msg = Message::signal(MessageId::FOUND_ADVERTISED_NAME)
            .with_sender(":1.9")
            .with_arg(Argument::String("com.example.tv".into()));

        let done = conn.on_found_advertised_name(CallbackId(3), &mut msg).unwrap();
        assert!(done.keep_callback);
        let reply = done.outcome.unwrap();
        assert_eq!(reply.values, json!({ "name": "com.example.tv", "sender": ":1.9" }));
        assert_eq!(
            conn.session_state(),
            SessionState::Found {
                name: "com.example.tv".into(),
                sender: Some(":1.9".into())
            }
        );
    }

    #[test]
    fn join_success_uses_decoded_session_id() {
        let (conn, _rx) = connection();
        conn.join_session(CallbackId(1), "com.example", 42).unwrap();
        assert!(conn.registry().contains(MessageId::JOIN_SESSION.reply()));

        let mut reply = join_reply(1, 1234).with_session_id(99);
        let done = conn.on_join_reply(CallbackId(1), "com.example", &mut reply).unwrap();
        assert_eq!(done.outcome.unwrap().values, json!([1234, "com.example"]));
        assert!(!done.keep_callback);
        assert_eq!(
            conn.session_state(),
            SessionState::Joined {
                session_id: 1234,
                name: "com.example".into()
            }
        );
    }

    #[test]
    fn join_already_joined_uses_header_session_id() {
        let (conn, _rx) = connection();
        let mut reply = join_reply(7, 555).with_session_id(7);
        let done = conn.on_join_reply(CallbackId(1), "com.example", &mut reply).unwrap();
        assert_eq!(done.outcome.unwrap().values, json!([7, "com.example"]));
    }

    #[test]
    fn join_failure_codes_and_error_replies_fail() {
        let (conn, _rx) = connection();
        let mut reply = join_reply(5, 0);
        let done = conn.on_join_reply(CallbackId(1), "com.example", &mut reply).unwrap();
        assert_eq!(done.outcome.unwrap_err(), "failure joining session, reply code 5");
        assert_eq!(
            conn.session_state(),
            SessionState::JoinFailed {
                name: "com.example".into(),
                reply_code: Some(5)
            }
        );

        let mut error = Message::new(MessageKind::Error, MessageId::JOIN_SESSION.reply());
        let done = conn.on_join_reply(CallbackId(2), "com.example", &mut error).unwrap();
        assert!(!done.is_success());
    }

    #[test]
    fn malformed_join_reply_is_an_error() {
        let (conn, _rx) = connection();
        let mut reply =
            Message::method_reply(MessageId::JOIN_SESSION).with_arg(Argument::UInt32(1));
        assert!(conn.on_join_reply(CallbackId(1), "x", &mut reply).is_err());
    }

    #[test]
    fn leave_returns_to_idle() {
        let (conn, _rx) = connection();
        conn.join_session(CallbackId(1), "com.example", 42).unwrap();
        conn.leave_session(7).unwrap();
        assert_eq!(conn.session_state(), SessionState::Idle);
        assert!(conn
            .bus()
            .calls()
            .contains(&BusCall::LeaveSession { session_id: 7 }));
    }

    fn polled_connection() -> (Arc<BusConnection<LoopbackBus>>, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel();
        let config = EngineConfig {
            poll: PollConfig {
                period: Duration::from_millis(1),
                unmarshal_timeout: Duration::from_millis(50),
            },
            ..EngineConfig::default()
        };
        let conn = BusConnection::new(Arc::new(LoopbackBus::connected()), config, Arc::new(tx));
        conn.enable_polling();
        (Arc::new(conn), rx)
    }

    #[test]
    fn join_reply_sent_during_the_request_is_not_lost() {
        let (conn, rx) = polled_connection();
        conn.bus().respond_on(
            Operation::JoinSession,
            join_reply(1, 4321).with_sender("org.freedesktop.DBus"),
        );
        let poller = PollLoop::new(Arc::clone(&conn)).spawn().unwrap();

        conn.join_session(CallbackId(6), "com.example", 42).unwrap();

        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        poller.stop();
        assert_eq!(done.callback, CallbackId(6));
        assert_eq!(done.outcome.unwrap().values, json!([4321, "com.example"]));
        assert!(conn.bus().bus_handled().is_empty());
        assert!(conn.registry().is_empty());
        assert_eq!(
            conn.session_state(),
            SessionState::Joined {
                session_id: 4321,
                name: "com.example".into()
            }
        );
    }

    #[test]
    fn found_signal_sent_during_the_request_is_not_lost() {
        let (conn, rx) = polled_connection();
        conn.bus().respond_on(
            Operation::FindAdvertisedName,
            Message::signal(MessageId::FOUND_ADVERTISED_NAME)
                .with_sender(":1.2")
                .with_arg(Argument::String("com.example.tv".into())),
        );
        let poller = PollLoop::new(Arc::clone(&conn)).spawn().unwrap();

        conn.start_discovery(CallbackId(7), "com.example").unwrap();

        let done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        poller.stop();
        assert!(done.is_success());
        assert!(conn.bus().bus_handled().is_empty());
        assert!(conn.registry().is_empty());
        assert!(matches!(conn.session_state(), SessionState::Found { .. }));
    }

    #[test]
    fn failed_join_restores_state_and_earlier_handler() {
        let (conn, _rx) = connection();
        conn.join_session(CallbackId(1), "com.example", 42).unwrap();
        conn.bus()
            .fail_next(Operation::JoinSession, TransportError::Failure("busy".into()));

        assert!(conn.join_session(CallbackId(2), "com.other", 7).is_err());

        let pending = conn.registry().take_and_remove(MessageId::JOIN_SESSION.reply());
        assert_eq!(pending.map(|c| c.callback()), Some(CallbackId(1)));
        assert_eq!(
            conn.session_state(),
            SessionState::Joining {
                name: "com.example".into(),
                port: 42
            }
        );
    }

    #[test]
    fn stop_discovery_drops_pending_request() {
        let (conn, _rx) = connection();
        conn.start_discovery(CallbackId(1), "com.example").unwrap();

        assert!(conn.stop_discovery("com.example").unwrap());
        assert!(!conn.stop_discovery("com.example").unwrap());
        assert!(conn.registry().is_empty());
        assert_eq!(conn.session_state(), SessionState::Idle);
        assert!(conn.bus().calls().contains(&BusCall::FindAdvertisedName {
            prefix: "com.example".into(),
            op: FindOp::Stop
        }));
    }
}
