//! Host-facing request surface.
//!
//! Hosts name an action and pass positional JSON arguments. Every accepted
//! request eventually yields at least one [`Completion`] for its callback;
//! a rejected request yields exactly one failure completion, produced before
//! any bus I/O.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thinbus_message::{MessageId, ObjectDescriptor, ObjectTable};
use thinbus_transport::{NativeBus, RuleOp};
use tracing::{debug, info, warn};

use crate::completion::{CallbackId, Completion, CompletionSink, Reply};
use crate::config::EngineConfig;
use crate::connection::BusConnection;
use crate::error::{EngineError, Result};
use crate::invoker::InvokeRequest;
use crate::poll::{PollHandle, PollLoop};

/// A parsed host request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect {
        service_name: Option<String>,
        timeout: Option<Duration>,
    },
    RegisterObjects {
        local: Vec<ObjectDescriptor>,
        proxy: Vec<ObjectDescriptor>,
    },
    StartDiscovery {
        service_name: String,
    },
    StopDiscovery {
        service_name: String,
    },
    SetSignalFilter {
        rule: String,
        op: RuleOp,
    },
    AddListener {
        id: MessageId,
        response_type: String,
    },
    JoinSession {
        name: String,
        port: u16,
    },
    LeaveSession {
        session_id: u32,
    },
    Invoke(InvokeRequest),
}

#[derive(Deserialize)]
struct JoinTarget {
    name: String,
    port: u16,
}

impl Request {
    /// Parse `action` and its positional arguments.
    pub fn parse(action: &str, args: &[Value]) -> Result<Self> {
        let args = Args { action, args };
        Ok(match action {
            "connect" => Request::Connect {
                service_name: args.opt_string(0, "serviceName")?,
                timeout: args.opt_u64(1, "timeoutMs")?.map(Duration::from_millis),
            },
            "registerObjects" => Request::RegisterObjects {
                local: args.objects(0, "localObjects")?,
                proxy: args.objects(1, "remoteObjects")?,
            },
            "startDiscovery" | "addAdvertisedNameListener" => Request::StartDiscovery {
                service_name: args.string(0, "serviceName")?,
            },
            "stopDiscovery" | "cancelAdvertisedNameListener" => Request::StopDiscovery {
                service_name: args.string(0, "serviceName")?,
            },
            "setSignalFilter" | "setSignalRule" => {
                let code = args.u64(1, "ruleType")?;
                let op = i64::try_from(code)
                    .ok()
                    .and_then(RuleOp::from_code)
                    .ok_or_else(|| args.invalid(format!("ruleType must be 0 or 1, got {code}")))?;
                Request::SetSignalFilter {
                    rule: args.string(0, "rule")?,
                    op,
                }
            }
            "addListener" => Request::AddListener {
                id: args.message_id(0, "indexList")?,
                response_type: args.string(1, "responseType")?,
            },
            "joinSession" => {
                let target: JoinTarget = serde_json::from_value(args.required(0, "server")?.clone())
                    .map_err(|err| args.invalid(format!("server: {err}")))?;
                Request::JoinSession {
                    name: target.name,
                    port: target.port,
                }
            }
            "leaveSession" => Request::LeaveSession {
                session_id: args.u32(0, "sessionId")?,
            },
            "invoke" | "invokeMember" => {
                // Required by the host contract; resolution uses the identifier.
                args.string(2, "signature")?;
                Request::Invoke(InvokeRequest {
                    session_id: args.u32(0, "sessionId")?,
                    destination: args.opt_string(1, "destination")?.unwrap_or_default(),
                    path: args.opt_string(3, "path")?,
                    id: args.message_id(4, "indexList")?,
                    parameter_signature: args.opt_string(5, "parameterTypes")?,
                    parameters: args.values(6, "parameters")?,
                    out_signature: args.opt_string(7, "outParameterSignature")?,
                })
            }
            other => return Err(EngineError::UnknownAction(other.to_string())),
        })
    }
}

/// Positional argument access with request-level error messages.
struct Args<'a> {
    action: &'a str,
    args: &'a [Value],
}

impl Args<'_> {
    fn invalid(&self, reason: impl std::fmt::Display) -> EngineError {
        EngineError::InvalidRequest(format!("{}: {reason}", self.action))
    }

    fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index).filter(|value| !value.is_null())
    }

    fn required(&self, index: usize, name: &str) -> Result<&Value> {
        self.get(index)
            .ok_or_else(|| self.invalid(format!("missing argument {name}")))
    }

    fn string(&self, index: usize, name: &str) -> Result<String> {
        self.opt_string(index, name)?
            .ok_or_else(|| self.invalid(format!("missing argument {name}")))
    }

    /// Absent, `null` and the text `"null"` all mean no value.
    fn opt_string(&self, index: usize, name: &str) -> Result<Option<String>> {
        match self.get(index) {
            None => Ok(None),
            Some(Value::String(text)) if text == "null" => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(other) => Err(self.invalid(format!("{name} must be a string, got {other}"))),
        }
    }

    fn opt_u64(&self, index: usize, name: &str) -> Result<Option<u64>> {
        match self.get(index) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("{name} must be a non-negative integer"))),
        }
    }

    fn u64(&self, index: usize, name: &str) -> Result<u64> {
        self.opt_u64(index, name)?
            .ok_or_else(|| self.invalid(format!("missing argument {name}")))
    }

    fn u32(&self, index: usize, name: &str) -> Result<u32> {
        let value = self.u64(index, name)?;
        u32::try_from(value).map_err(|_| self.invalid(format!("{name} {value} exceeds uint32")))
    }

    fn message_id(&self, index: usize, name: &str) -> Result<MessageId> {
        let indices: Vec<i64> = serde_json::from_value(self.required(index, name)?.clone())
            .map_err(|err| self.invalid(format!("{name}: {err}")))?;
        Ok(MessageId::try_from_indices(&indices)?)
    }

    fn objects(&self, index: usize, name: &str) -> Result<Vec<ObjectDescriptor>> {
        match self.get(index) {
            None => Ok(Vec::new()),
            Some(value) => ObjectDescriptor::list_from_value(value)
                .map_err(|err| self.invalid(format!("{name}: {err}"))),
        }
    }

    fn values(&self, index: usize, name: &str) -> Result<Vec<Value>> {
        match self.get(index) {
            None => Ok(Vec::new()),
            Some(Value::Array(values)) => Ok(values.clone()),
            Some(other) => Err(self.invalid(format!("{name} must be an array, got {other}"))),
        }
    }
}

struct Active<B: NativeBus> {
    conn: Arc<BusConnection<B>>,
    poller: Option<PollHandle>,
}

struct BridgeState<B: NativeBus> {
    objects: ObjectTable,
    active: Option<Active<B>>,
}

/// Routes host requests to at most one live [`BusConnection`].
pub struct Bridge<B: NativeBus + 'static> {
    bus: Arc<B>,
    config: EngineConfig,
    sink: Arc<dyn CompletionSink>,
    state: Mutex<BridgeState<B>>,
}

impl<B: NativeBus + 'static> Bridge<B> {
    pub fn new(bus: Arc<B>, config: EngineConfig, sink: Arc<dyn CompletionSink>) -> Self {
        Self {
            bus,
            config,
            sink,
            state: Mutex::new(BridgeState {
                objects: ObjectTable::default(),
                active: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BridgeState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse and run one host request.
    ///
    /// Returns `false` when the request was rejected; the failure has then
    /// already been delivered to `callback`.
    pub fn execute(&self, callback: CallbackId, action: &str, args: &[Value]) -> bool {
        debug!(action, %callback, "host request");
        let result =
            Request::parse(action, args).and_then(|request| self.handle(callback, request));
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(action, %callback, error = %err, "request failed");
                self.sink.complete(Completion::failure(callback, err));
                false
            }
        }
    }

    /// Like [`Bridge::execute`], with the positional arguments given as the
    /// text of a JSON array.
    pub fn execute_json(&self, callback: CallbackId, action: &str, args: &str) -> bool {
        match serde_json::from_str::<Vec<Value>>(args) {
            Ok(args) => self.execute(callback, action, &args),
            Err(err) => {
                let err = EngineError::from(err);
                warn!(action, %callback, error = %err, "request arguments are not a JSON array");
                self.sink.complete(Completion::failure(callback, err));
                false
            }
        }
    }

    /// Run a parsed request.
    pub fn handle(&self, callback: CallbackId, request: Request) -> Result<()> {
        match request {
            Request::Connect {
                service_name,
                timeout,
            } => {
                self.connect(service_name.as_deref(), timeout)?;
                self.acknowledge(callback, "connected to bus");
            }
            Request::RegisterObjects { local, proxy } => {
                self.register_objects(local, proxy)?;
                self.acknowledge(callback, "objects registered");
            }
            Request::StartDiscovery { service_name } => {
                self.connection()?.start_discovery(callback, &service_name)?;
            }
            Request::StopDiscovery { service_name } => {
                let pending = self.connection()?.stop_discovery(&service_name)?;
                let text = if pending {
                    "discovery stopped"
                } else {
                    "discovery already finished"
                };
                self.acknowledge(callback, text);
            }
            Request::SetSignalFilter { rule, op } => {
                self.connection()?.set_signal_rule(&rule, op)?;
                self.acknowledge(callback, "signal rule updated");
            }
            Request::AddListener { id, response_type } => {
                debug!(msg_id = %id, response_type = %response_type, "adding listener");
                self.connection()?.add_listener(callback, id)?;
            }
            Request::JoinSession { name, port } => {
                self.connection()?.join_session(callback, &name, port)?;
            }
            Request::LeaveSession { session_id } => {
                self.connection()?.leave_session(session_id)?;
                self.acknowledge(callback, "session left");
            }
            Request::Invoke(request) => {
                self.connection()?.invoke(callback, &request)?;
            }
        }
        Ok(())
    }

    fn acknowledge(&self, callback: CallbackId, text: &str) {
        self.sink.complete(Completion::success(callback, Reply::text(text)));
    }

    /// The live connection.
    pub fn connection(&self) -> Result<Arc<BusConnection<B>>> {
        self.state()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.conn))
            .ok_or(EngineError::NotConnected)
    }

    /// Connect, replacing any previous connection.
    pub fn connect(
        &self,
        service_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Arc<BusConnection<B>>> {
        // Stopping the old poller joins its thread, which may be calling
        // back into this bridge; the state lock must be released first.
        let previous = self.state().active.take();
        if let Some(previous) = previous {
            info!("replacing existing bus connection");
            drop(previous);
        }

        let mut config = self.config;
        if let Some(timeout) = timeout {
            config.connect_timeout = timeout;
        }
        let conn = Arc::new(BusConnection::connect(
            Arc::clone(&self.bus),
            service_name,
            config,
            Arc::clone(&self.sink),
        )?);

        let mut state = self.state();
        conn.install_objects(state.objects.clone());
        let poller = if config.spawn_poller {
            Some(PollLoop::new(Arc::clone(&conn)).spawn()?)
        } else {
            None
        };
        state.active = Some(Active {
            conn: Arc::clone(&conn),
            poller,
        });
        Ok(conn)
    }

    /// Register objects with the native layer, now and for later connections.
    pub fn register_objects(
        &self,
        local: Vec<ObjectDescriptor>,
        proxy: Vec<ObjectDescriptor>,
    ) -> Result<()> {
        let mut state = self.state();
        match &state.active {
            Some(active) => active.conn.register_objects(local.clone(), proxy.clone())?,
            None => self.bus.register_objects(&local, &proxy)?,
        }
        state.objects = ObjectTable::new(local, proxy);
        Ok(())
    }

    /// Drop the live connection and stop its poller.
    pub fn disconnect(&self) -> bool {
        let previous = self.state().active.take();
        match previous {
            Some(active) => {
                active.conn.disable_polling();
                let dropped = active.conn.registry().clear();
                drop(active);
                info!(dropped, "disconnected from bus");
                true
            }
            None => false,
        }
    }

    /// Whether a background poll thread is running.
    pub fn is_polling(&self) -> bool {
        self.state()
            .active
            .as_ref()
            .and_then(|active| active.poller.as_ref())
            .is_some_and(PollHandle::is_running)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use thinbus_message::MessageError;

    use super::*;

    #[test]
    fn parse_connect_variants() {
        assert_eq!(
            Request::parse("connect", &[]).unwrap(),
            Request::Connect {
                service_name: None,
                timeout: None
            }
        );
        assert_eq!(
            Request::parse("connect", &[json!("org.example"), json!(1500)]).unwrap(),
            Request::Connect {
                service_name: Some("org.example".into()),
                timeout: Some(Duration::from_millis(1500))
            }
        );
    }

    #[test]
    fn parse_join_session_object() {
        let request =
            Request::parse("joinSession", &[json!({ "name": "com.example", "port": 42 })]).unwrap();
        assert_eq!(
            request,
            Request::JoinSession {
                name: "com.example".into(),
                port: 42
            }
        );
        assert!(Request::parse("joinSession", &[json!({ "name": "x", "port": 70000 })]).is_err());
        assert!(Request::parse("joinSession", &[Value::Null]).is_err());
    }

    #[test]
    fn parse_invoke_positional_arguments() {
        let args = [
            json!(7),
            json!(":1.5"),
            json!("?Add a<i b<i >x"),
            json!("/remote"),
            json!([2, 0, 0, 0]),
            json!("ii"),
            json!([1, 2]),
            json!("x"),
        ];
        let Request::Invoke(request) = Request::parse("invokeMember", &args).unwrap() else {
            panic!("expected invoke");
        };
        assert_eq!(request.session_id, 7);
        assert_eq!(request.destination, ":1.5");
        assert_eq!(request.path.as_deref(), Some("/remote"));
        assert_eq!(request.id, MessageId::encode(2, 0, 0, 0));
        assert_eq!(request.parameters, vec![json!(1), json!(2)]);
        assert_eq!(request.out_signature.as_deref(), Some("x"));
    }

    #[test]
    fn parse_rejects_contract_violations() {
        let missing_signature = [
            json!(7),
            json!(":1.5"),
            Value::Null,
            json!("/r"),
            json!([2, 0, 0, 0]),
        ];
        assert!(matches!(
            Request::parse("invoke", &missing_signature),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            Request::parse("addListener", &[json!([1, 2, 3]), json!("signal")]),
            Err(EngineError::Message(MessageError::IndexCount(3)))
        ));
        assert!(matches!(
            Request::parse("addListener", &[json!([1, 2, 3, 256]), json!("signal")]),
            Err(EngineError::Message(_))
        ));
        assert!(matches!(
            Request::parse("setSignalFilter", &[json!("type='signal'"), json!(2)]),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            Request::parse("teleport", &[]),
            Err(EngineError::UnknownAction(_))
        ));
    }

    #[test]
    fn parse_register_objects_allows_null_sets() {
        let local = json!([
            { "path": "/p", "interfaces": [["org.example.P", "?Ping >s"], null] },
            null
        ]);
        let Request::RegisterObjects { local, proxy } =
            Request::parse("registerObjects", &[local, Value::Null]).unwrap()
        else {
            panic!("expected registerObjects");
        };
        assert_eq!(local.len(), 1);
        assert!(proxy.is_empty());
    }
}
