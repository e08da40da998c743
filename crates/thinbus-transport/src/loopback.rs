use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thinbus_message::{Argument, Message, MessageId, ObjectDescriptor, TypeCode};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{FindOp, NativeBus, RuleOp};

/// Native operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    RegisterObjects,
    FindAdvertisedName,
    SetSignalRule,
    JoinSession,
    LeaveSession,
    SetProxyObjectPath,
    HandleBusMessage,
    MarshalMethodCall,
    MarshalArg,
    DeliverMsg,
}

/// A control request observed by the loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Connect { service_name: Option<String> },
    RegisterObjects { local: usize, proxy: usize },
    FindAdvertisedName { prefix: String, op: FindOp },
    SetSignalRule { rule: String, op: RuleOp },
    JoinSession { name: String, port: u16 },
    LeaveSession { session_id: u32 },
    SetProxyObjectPath { id: MessageId, path: String },
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    inbound: VecDeque<Result<Message>>,
    delivered: Vec<Message>,
    bus_handled: Vec<MessageId>,
    calls: Vec<BusCall>,
    failures: Vec<(Operation, TransportError)>,
    responses: Vec<(Operation, Message)>,
    released: usize,
}

impl State {
    fn check(&mut self, op: Operation) -> Result<()> {
        match self.failures.iter().position(|(failing, _)| *failing == op) {
            Some(index) => Err(self.failures.remove(index).1),
            None => Ok(()),
        }
    }

    /// Move the responses scripted for `op` onto the inbound queue.
    fn answer(&mut self, op: Operation) -> bool {
        let mut answered = false;
        let mut index = 0;
        while index < self.responses.len() {
            if self.responses[index].0 == op {
                let (_, msg) = self.responses.remove(index);
                self.inbound.push_back(Ok(msg));
                answered = true;
            } else {
                index += 1;
            }
        }
        answered
    }

    fn require_connection(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

/// In-memory [`NativeBus`] with scripted inbound traffic.
///
/// Inbound outcomes are queued with [`LoopbackBus::push_inbound`] or
/// [`LoopbackBus::push_outcome`] and handed out in order by
/// `unmarshal_msg`, which blocks up to its timeout while the queue is empty.
/// Outbound messages, control calls and buffer releases are recorded for
/// inspection.
#[derive(Debug, Default)]
pub struct LoopbackBus {
    state: Mutex<State>,
    arrived: Condvar,
}

impl LoopbackBus {
    /// A loopback that must be connected before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// A loopback that is already connected.
    pub fn connected() -> Self {
        let bus = Self::default();
        bus.state().connected = true;
        bus
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an inbound message.
    pub fn push_inbound(&self, msg: Message) {
        self.push_outcome(Ok(msg));
    }

    /// Queue an arbitrary unmarshal outcome, including failures.
    pub fn push_outcome(&self, outcome: Result<Message>) {
        self.state().inbound.push_back(outcome);
        self.arrived.notify_all();
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: Operation, err: TransportError) {
        self.state().failures.push((op, err));
    }

    /// Queue `msg` as inbound traffic from inside the next successful call
    /// of `op`, before that call returns.
    pub fn respond_on(&self, op: Operation, msg: Message) {
        self.state().responses.push((op, msg));
    }

    fn finish(&self, mut state: MutexGuard<'_, State>, op: Operation) {
        let answered = state.answer(op);
        drop(state);
        if answered {
            trace!(?op, "loopback queued scripted response");
            self.arrived.notify_all();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn pending_inbound(&self) -> usize {
        self.state().inbound.len()
    }

    /// Messages delivered so far.
    pub fn delivered(&self) -> Vec<Message> {
        self.state().delivered.clone()
    }

    /// Drain delivered messages.
    pub fn take_delivered(&self) -> Vec<Message> {
        std::mem::take(&mut self.state().delivered)
    }

    /// Control requests made so far.
    pub fn calls(&self) -> Vec<BusCall> {
        self.state().calls.clone()
    }

    /// Identifiers of messages passed to the built-in bus handlers.
    pub fn bus_handled(&self) -> Vec<MessageId> {
        self.state().bus_handled.clone()
    }

    /// Number of messages released with `close_msg`.
    pub fn released(&self) -> usize {
        self.state().released
    }
}

impl NativeBus for LoopbackBus {
    fn connect(&self, service_name: Option<&str>, _timeout: Duration) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::Connect {
            service_name: service_name.map(str::to_string),
        });
        state.check(Operation::Connect)?;
        state.connected = true;
        Ok(())
    }

    fn register_objects(
        &self,
        local: &[ObjectDescriptor],
        proxy: &[ObjectDescriptor],
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::RegisterObjects {
            local: local.len(),
            proxy: proxy.len(),
        });
        state.check(Operation::RegisterObjects)
    }

    fn find_advertised_name(&self, prefix: &str, op: FindOp) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::FindAdvertisedName {
            prefix: prefix.to_string(),
            op,
        });
        state.check(Operation::FindAdvertisedName)?;
        state.require_connection()?;
        self.finish(state, Operation::FindAdvertisedName);
        Ok(())
    }

    fn set_signal_rule(&self, rule: &str, op: RuleOp) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::SetSignalRule {
            rule: rule.to_string(),
            op,
        });
        state.check(Operation::SetSignalRule)?;
        state.require_connection()
    }

    fn join_session(&self, name: &str, port: u16) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::JoinSession {
            name: name.to_string(),
            port,
        });
        state.check(Operation::JoinSession)?;
        state.require_connection()?;
        self.finish(state, Operation::JoinSession);
        Ok(())
    }

    fn leave_session(&self, session_id: u32) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::LeaveSession { session_id });
        state.check(Operation::LeaveSession)?;
        state.require_connection()
    }

    fn set_proxy_object_path(&self, id: MessageId, path: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(BusCall::SetProxyObjectPath {
            id,
            path: path.to_string(),
        });
        state.check(Operation::SetProxyObjectPath)
    }

    fn unmarshal_msg(&self, timeout: Duration) -> Result<Message> {
        let state = self.state();
        let (mut state, _) = self
            .arrived
            .wait_timeout_while(state, timeout, |state| state.inbound.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.inbound.pop_front().unwrap_or(Err(TransportError::Timeout))
    }

    fn handle_bus_message(&self, msg: &mut Message) -> Result<()> {
        let mut state = self.state();
        state.bus_handled.push(msg.id);
        state.check(Operation::HandleBusMessage)
    }

    fn close_msg(&self, msg: &mut Message) {
        msg.payload.clear();
        self.state().released += 1;
    }

    fn marshal_method_call(
        &self,
        id: MessageId,
        destination: &str,
        session_id: u32,
        flags: u8,
        _timeout: Duration,
    ) -> Result<Message> {
        let mut state = self.state();
        state.check(Operation::MarshalMethodCall)?;
        state.require_connection()?;
        let mut msg = Message::method_call(id, destination, session_id);
        msg.flags = flags;
        Ok(msg)
    }

    fn marshal_arg(&self, msg: &mut Message, arg: Argument) -> Result<()> {
        self.state().check(Operation::MarshalArg)?;
        msg.push_arg(arg);
        Ok(())
    }

    fn unmarshal_arg(&self, msg: &mut Message, code: TypeCode) -> Result<Argument> {
        let arg = msg.payload.next_arg().ok_or(TransportError::EndOfArgs)?;
        let found = arg.type_code();
        if found != code {
            return Err(TransportError::ArgMismatch {
                expected: code.as_char(),
                found: found.as_char(),
            });
        }
        Ok(arg)
    }

    fn deliver_msg(&self, msg: Message) -> Result<()> {
        let mut state = self.state();
        state.check(Operation::DeliverMsg)?;
        state.require_connection()?;
        trace!(msg_id = %msg.id, "loopback delivered message");
        state.delivered.push(msg);
        self.finish(state, Operation::DeliverMsg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn empty_queue_times_out() {
        let bus = LoopbackBus::connected();
        let start = Instant::now();
        let err = bus.unmarshal_msg(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn queued_outcomes_come_back_in_order() {
        let bus = LoopbackBus::connected();
        bus.push_outcome(Err(TransportError::NoMatch));
        bus.push_inbound(Message::signal(MessageId::FOUND_ADVERTISED_NAME));

        assert!(matches!(
            bus.unmarshal_msg(Duration::ZERO),
            Err(TransportError::NoMatch)
        ));
        let msg = bus.unmarshal_msg(Duration::ZERO).unwrap();
        assert_eq!(msg.id, MessageId::FOUND_ADVERTISED_NAME);
        assert_eq!(bus.pending_inbound(), 0);
    }

    #[test]
    fn waiting_unmarshal_wakes_on_push() {
        let bus = Arc::new(LoopbackBus::connected());
        let pusher = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                bus.push_inbound(Message::signal(MessageId::FOUND_ADVERTISED_NAME));
            })
        };

        let msg = bus.unmarshal_msg(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.id, MessageId::FOUND_ADVERTISED_NAME);
        pusher.join().unwrap();
    }

    #[test]
    fn unmarshal_arg_checks_type() {
        let bus = LoopbackBus::connected();
        let mut msg = Message::signal(MessageId::FOUND_ADVERTISED_NAME)
            .with_arg(Argument::String("name".into()));

        let err = bus.unmarshal_arg(&mut msg, TypeCode::UInt32).unwrap_err();
        assert!(matches!(
            err,
            TransportError::ArgMismatch {
                expected: 'u',
                found: 's'
            }
        ));
        assert!(matches!(
            bus.unmarshal_arg(&mut msg, TypeCode::String),
            Err(TransportError::EndOfArgs)
        ));
    }

    #[test]
    fn scripted_failure_fires_once() {
        let bus = LoopbackBus::new();
        bus.fail_next(Operation::Connect, TransportError::Connect("no router".into()));

        assert!(bus.connect(None, Duration::from_secs(1)).is_err());
        assert!(!bus.is_connected());
        bus.connect(Some("org.example"), Duration::from_secs(1)).unwrap();
        assert!(bus.is_connected());
        assert_eq!(bus.calls().len(), 2);
    }

    #[test]
    fn delivery_requires_connection() {
        let bus = LoopbackBus::new();
        let err = bus
            .deliver_msg(Message::signal(MessageId::FOUND_ADVERTISED_NAME))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn scripted_response_arrives_during_the_call() {
        let bus = LoopbackBus::connected();
        bus.respond_on(
            Operation::JoinSession,
            Message::method_reply(MessageId::JOIN_SESSION),
        );
        bus.fail_next(Operation::JoinSession, TransportError::Failure("busy".into()));

        assert!(bus.join_session("com.example", 42).is_err());
        assert_eq!(bus.pending_inbound(), 0);

        bus.join_session("com.example", 42).unwrap();
        let reply = bus.unmarshal_msg(Duration::ZERO).unwrap();
        assert_eq!(reply.id, MessageId::JOIN_SESSION.reply());
        assert_eq!(bus.pending_inbound(), 0);
    }
}
