use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use thinbus_engine::{
    Bridge, CallbackId, Completion, CompletionSink, EngineConfig, PollConfig, PollLoop,
    SessionState, TickOutcome,
};
use thinbus_message::{Argument, Message, MessageId, MessageKind, APP_ID_FLAG, PROXY_ID_FLAG};
use thinbus_transport::{BusCall, LoopbackBus, RuleOp};

const WAIT: Duration = Duration::from_secs(5);

fn manual_config() -> EngineConfig {
    EngineConfig {
        poll: PollConfig {
            period: Duration::from_millis(5),
            unmarshal_timeout: Duration::from_millis(10),
        },
        spawn_poller: false,
        ..EngineConfig::default()
    }
}

type Harness = (Bridge<LoopbackBus>, Arc<LoopbackBus>, Receiver<Completion>);

fn bridge(config: EngineConfig) -> Harness {
    let (tx, rx) = mpsc::channel();
    let bus = Arc::new(LoopbackBus::new());
    (Bridge::new(Arc::clone(&bus), config, Arc::new(tx)), bus, rx)
}

fn connected(config: EngineConfig) -> Harness {
    let (bridge, bus, rx) = bridge(config);
    assert!(bridge.execute(CallbackId(0), "connect", &[json!("com.example")]));
    let ack = rx.recv_timeout(WAIT).expect("connect should be acknowledged");
    assert!(ack.is_success());
    (bridge, bus, rx)
}

fn poller(bridge: &Bridge<LoopbackBus>) -> PollLoop<LoopbackBus> {
    PollLoop::new(bridge.connection().expect("bridge should be connected"))
}

fn register_objects(bridge: &Bridge<LoopbackBus>, rx: &Receiver<Completion>) {
    let local = json!([
        { "path": "/local", "interfaces": [["org.example.Local", "?Echo text<s >s"], null] },
        null
    ]);
    let remote = json!([
        {
            "path": "/remote",
            "interfaces": [["$org.example.Calc", "?Add a<i b<i >x", "!Overflow"]]
        },
        null
    ]);
    assert!(bridge.execute(CallbackId(100), "registerObjects", &[local, remote]));
    assert!(rx.recv_timeout(WAIT).expect("registration ack").is_success());
}

#[test]
fn discovery_reports_name_and_sender_once() {
    let (bridge, bus, rx) = connected(manual_config());
    let poller = poller(&bridge);

    assert!(bridge.execute(CallbackId(1), "startDiscovery", &[json!("com.example.service")]));
    bus.push_inbound(
        Message::signal(MessageId::FOUND_ADVERTISED_NAME)
            .with_sender("1.2.3")
            .with_arg(Argument::String("com.example.service".into())),
    );

    assert_eq!(poller.tick(), TickOutcome::Dispatched(MessageId::FOUND_ADVERTISED_NAME));
    let done = rx.recv_timeout(WAIT).expect("discovery notification");
    assert_eq!(done.callback, CallbackId(1));
    assert!(done.keep_callback);
    let reply = done.outcome.expect("discovery should succeed");
    assert_eq!(reply.values, json!({ "name": "com.example.service", "sender": "1.2.3" }));

    let conn = bridge.connection().expect("connected");
    assert!(!conn.registry().contains(MessageId::FOUND_ADVERTISED_NAME));
    assert!(rx.try_recv().is_err());
}

#[test]
fn join_already_joined_reports_prior_session_id() {
    let (bridge, bus, rx) = connected(manual_config());
    let poller = poller(&bridge);

    assert!(bridge.execute(
        CallbackId(2),
        "joinSession",
        &[json!({ "name": "com.example.service", "port": 42 })]
    ));
    assert!(bus.calls().contains(&BusCall::JoinSession {
        name: "com.example.service".into(),
        port: 42
    }));

    bus.push_inbound(
        Message::method_reply(MessageId::JOIN_SESSION)
            .with_session_id(7)
            .with_arg(Argument::UInt32(7))
            .with_arg(Argument::UInt32(31337)),
    );
    assert_eq!(poller.tick(), TickOutcome::Dispatched(MessageId::JOIN_SESSION.reply()));

    let done = rx.recv_timeout(WAIT).expect("join completion");
    assert!(!done.keep_callback);
    let reply = done.outcome.expect("already joined counts as success");
    assert_eq!(reply.values, json!([7, "com.example.service"]));
    assert_eq!(
        bridge.connection().expect("connected").session_state(),
        SessionState::Joined {
            session_id: 7,
            name: "com.example.service".into()
        }
    );
}

#[test]
fn invoke_with_session_zero_uses_local_objects() {
    let (bridge, bus, rx) = connected(manual_config());
    register_objects(&bridge, &rx);
    let poller = poller(&bridge);

    let args = [
        json!(0),
        json!(""),
        json!("?Echo text<s >s"),
        Value::Null,
        json!([PROXY_ID_FLAG, 0, 0, 0]),
        json!("s"),
        json!(["ping"]),
        json!("s"),
    ];
    assert!(bridge.execute(CallbackId(3), "invoke", &args));

    let local = MessageId::encode(APP_ID_FLAG, 0, 0, 0);
    let sent = bus.take_delivered();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, local);
    assert_eq!(sent[0].kind, MessageKind::MethodCall);

    bus.push_inbound(
        Message::method_reply(local)
            .with_sender(":1.1")
            .with_arg(Argument::String("pong".into())),
    );
    assert_eq!(poller.tick(), TickOutcome::Dispatched(local.reply()));
    let done = rx.recv_timeout(WAIT).expect("reply completion");
    assert_eq!(done.callback, CallbackId(3));
    assert_eq!(
        done.outcome.expect("reply should decode").to_json(),
        json!([{ "sender": ":1.1", "signature": "s" }, ["pong"], null])
    );
}

#[test]
fn withdrawn_handler_routes_late_reply_to_bus_handlers() {
    let (bridge, bus, rx) = connected(manual_config());
    register_objects(&bridge, &rx);
    let poller = poller(&bridge);

    let remote = MessageId::encode(PROXY_ID_FLAG, 0, 0, 0);
    let args = [
        json!(12),
        json!(":1.5"),
        json!("?Add a<i b<i >x"),
        json!("/remote"),
        json!([2, 0, 0, 0]),
        json!("ii"),
        json!([20, 22]),
        json!("x"),
    ];
    assert!(bridge.execute(CallbackId(4), "invokeMember", &args));

    let conn = bridge.connection().expect("connected");
    assert!(conn.registry().take_and_remove(remote.reply()).is_some());

    bus.push_inbound(Message::method_reply(remote).with_arg(Argument::Int64(42)));
    assert_eq!(poller.tick(), TickOutcome::Forwarded(remote.reply()));
    assert_eq!(bus.bus_handled(), vec![remote.reply()]);
    assert_eq!(bus.released(), 1);
    assert!(rx.try_recv().is_err());
}

#[test]
fn rejected_requests_fail_without_bus_io() {
    let (bridge, bus, rx) = bridge(manual_config());

    assert!(!bridge.execute(CallbackId(5), "startDiscovery", &[json!("com.example")]));
    let done = rx.recv_timeout(WAIT).expect("failure completion");
    assert_eq!(done.outcome.expect_err("not connected"), "not connected to a bus");

    assert!(!bridge.execute(CallbackId(6), "joinSession", &[json!({ "name": "x" })]));
    assert!(!rx.recv_timeout(WAIT).expect("failure").is_success());

    assert!(!bridge.execute(CallbackId(7), "warp", &[]));
    assert!(!rx.recv_timeout(WAIT).expect("failure").is_success());

    assert!(bus.calls().is_empty());
}

#[test]
fn signal_filter_and_leave_session_are_acknowledged() {
    let (bridge, bus, rx) = connected(manual_config());

    assert!(bridge.execute(CallbackId(8), "setSignalFilter", &[json!("type='signal'"), json!(1)]));
    assert!(rx.recv_timeout(WAIT).expect("filter ack").is_success());

    assert!(bridge.execute(CallbackId(9), "leaveSession", &[json!(7)]));
    assert!(rx.recv_timeout(WAIT).expect("leave ack").is_success());

    let calls = bus.calls();
    assert!(calls.contains(&BusCall::LeaveSession { session_id: 7 }));
    assert!(calls.contains(&BusCall::SetSignalRule {
        rule: "type='signal'".into(),
        op: RuleOp::Add
    }));
}

#[test]
fn spawned_poller_delivers_listener_and_stops_on_disconnect() {
    let config = EngineConfig {
        spawn_poller: true,
        ..manual_config()
    };
    let (bridge, bus, rx) = connected(config);
    assert!(bridge.is_polling());

    let overflow = MessageId::encode(PROXY_ID_FLAG, 0, 0, 1);
    let indices = json!([2, 0, 0, 1]);
    assert!(bridge.execute(CallbackId(10), "addListener", &[indices, json!("signal")]));
    bus.push_inbound(Message::signal(overflow).with_sender(":1.5"));

    let done = rx.recv_timeout(WAIT).expect("listener completion");
    assert_eq!(done.callback, CallbackId(10));
    assert!(done.is_success());

    assert!(bridge.disconnect());
    assert!(!bridge.is_polling());
    assert!(bridge.connection().is_err());
}

#[test]
fn reconnect_keeps_registered_objects() {
    let (bridge, bus, rx) = connected(manual_config());
    register_objects(&bridge, &rx);

    assert!(bridge.execute(CallbackId(11), "connect", &[]));
    assert!(rx.recv_timeout(WAIT).expect("reconnect ack").is_success());

    let conn = bridge.connection().expect("connected");
    assert_eq!(conn.objects().local().len(), 1);
    assert_eq!(conn.objects().proxy().len(), 1);
    let connects = bus
        .calls()
        .into_iter()
        .filter(|call| matches!(call, BusCall::Connect { .. }))
        .count();
    assert_eq!(connects, 2);
}

/// Sink that calls back into the bridge while delivering listener events.
struct ReentrantSink {
    forward: Mutex<Sender<Completion>>,
    entered: Mutex<Sender<()>>,
    bridge: OnceLock<Weak<Bridge<LoopbackBus>>>,
}

impl CompletionSink for ReentrantSink {
    fn complete(&self, completion: Completion) {
        if completion.callback == CallbackId(10) {
            let _ = self.entered.lock().unwrap().send(());
            thread::sleep(Duration::from_millis(100));
            if let Some(bridge) = self.bridge.get().and_then(Weak::upgrade) {
                let _ = bridge.connection();
            }
        }
        let _ = self.forward.lock().unwrap().send(completion);
    }
}

#[test]
fn reconnect_while_sink_reenters_bridge_does_not_deadlock() {
    let (tx, rx) = mpsc::channel();
    let (entered_tx, entered_rx) = mpsc::channel();
    let sink = Arc::new(ReentrantSink {
        forward: Mutex::new(tx),
        entered: Mutex::new(entered_tx),
        bridge: OnceLock::new(),
    });
    let bus = Arc::new(LoopbackBus::new());
    let config = EngineConfig {
        spawn_poller: true,
        ..manual_config()
    };
    let bridge = Arc::new(Bridge::new(Arc::clone(&bus), config, sink.clone()));
    assert!(sink.bridge.set(Arc::downgrade(&bridge)).is_ok());

    assert!(bridge.execute(CallbackId(0), "connect", &[]));
    assert!(rx.recv_timeout(WAIT).expect("connect ack").is_success());
    let indices = json!([2, 0, 0, 1]);
    assert!(bridge.execute(CallbackId(10), "addListener", &[indices, json!("signal")]));
    let overflow = MessageId::encode(PROXY_ID_FLAG, 0, 0, 1);
    bus.push_inbound(Message::signal(overflow).with_sender(":1.5"));

    entered_rx.recv_timeout(WAIT).expect("poller should deliver the signal");
    let (done_tx, done_rx) = mpsc::channel();
    let reconnecting = Arc::clone(&bridge);
    thread::spawn(move || {
        let ok = reconnecting.execute(CallbackId(11), "connect", &[]);
        let _ = done_tx.send(ok);
    });

    assert!(done_rx.recv_timeout(WAIT).expect("reconnect should not block"));
    let completions: Vec<_> = rx.try_iter().map(|done| done.callback).collect();
    assert_eq!(completions, vec![CallbackId(10), CallbackId(11)]);
    assert!(bridge.is_polling());
    assert!(bridge.disconnect());
}

#[test]
fn stop_discovery_acknowledges_and_ignores_late_found_signal() {
    let (bridge, bus, rx) = connected(manual_config());
    let poll = poller(&bridge);

    assert!(bridge.execute(CallbackId(3), "startDiscovery", &[json!("com.example")]));
    assert!(bridge.execute(CallbackId(4), "stopDiscovery", &[json!("com.example")]));
    let ack = rx.recv_timeout(WAIT).expect("stop ack");
    assert_eq!(ack.callback, CallbackId(4));
    assert_eq!(ack.outcome.expect("stop succeeds").values, json!("discovery stopped"));

    let conn = bridge.connection().expect("connected");
    assert_eq!(conn.session_state(), SessionState::Idle);
    assert!(conn.registry().is_empty());

    bus.push_inbound(
        Message::signal(MessageId::FOUND_ADVERTISED_NAME)
            .with_sender(":1.9")
            .with_arg(Argument::String("com.example".into())),
    );
    assert_eq!(poll.tick(), TickOutcome::Forwarded(MessageId::FOUND_ADVERTISED_NAME));
    assert!(rx.try_recv().is_err());

    assert!(bridge.execute(CallbackId(5), "stopDiscovery", &[json!("com.example")]));
    let again = rx.recv_timeout(WAIT).expect("second stop ack");
    let text = again.outcome.expect("second stop succeeds").values;
    assert_eq!(text, json!("discovery already finished"));
}

#[test]
fn raw_argument_text_must_be_a_json_array() {
    let (bridge, bus, rx) = connected(manual_config());
    let before = bus.calls().len();

    assert!(!bridge.execute_json(CallbackId(6), "leaveSession", "{\"sessionId\": 4"));
    let failed = rx.recv_timeout(WAIT).expect("parse failure");
    assert_eq!(failed.callback, CallbackId(6));
    let message = failed.outcome.expect_err("malformed text should fail");
    assert!(message.starts_with("json error"), "{message}");
    assert_eq!(bus.calls().len(), before);

    assert!(bridge.execute_json(CallbackId(7), "leaveSession", "[4]"));
    let left = rx.recv_timeout(WAIT).expect("leave ack");
    assert_eq!(left.outcome.expect("leave succeeds").values, json!("session left"));
}
