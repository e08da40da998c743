use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thinbus_message::{Message, MessageId, ObjectDescriptor, ObjectTable, Signature};
use thinbus_transport::{NativeBus, RuleOp};
use tracing::{debug, info, warn};

use crate::codec;
use crate::completion::{CallbackId, Completion, CompletionSink, Reply};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::registry::{Continuation, HandlerRegistry};
use crate::session::{SessionCoordinator, SessionState};

/// A logical connection to the bus.
///
/// Owns the handler registry, the registered object sets and the session
/// state. Request methods may be called from any thread; inbound traffic is
/// drained by a [`PollLoop`](crate::PollLoop) sharing the same connection.
pub struct BusConnection<B: NativeBus> {
    bus: Arc<B>,
    registry: HandlerRegistry,
    objects: RwLock<ObjectTable>,
    sessions: SessionCoordinator,
    polling: AtomicBool,
    sink: Arc<dyn CompletionSink>,
    config: EngineConfig,
}

impl<B: NativeBus> BusConnection<B> {
    /// Wrap a native bus that is already connected. Polling starts disabled.
    pub fn new(bus: Arc<B>, config: EngineConfig, sink: Arc<dyn CompletionSink>) -> Self {
        Self {
            bus,
            registry: HandlerRegistry::new(),
            objects: RwLock::new(ObjectTable::default()),
            sessions: SessionCoordinator::new(),
            polling: AtomicBool::new(false),
            sink,
            config,
        }
    }

    /// Connect to a router and enable polling.
    ///
    /// An empty or absent `service_name` accepts any router.
    pub fn connect(
        bus: Arc<B>,
        service_name: Option<&str>,
        config: EngineConfig,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<Self> {
        let service_name = service_name.filter(|name| !name.is_empty());
        bus.connect(service_name, config.connect_timeout)?;
        info!(
            service_name = service_name.unwrap_or("<any>"),
            timeout_ms = config.connect_timeout.as_millis() as u64,
            "connected to bus router"
        );

        let conn = Self::new(bus, config, sink);
        conn.enable_polling();
        Ok(conn)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    pub fn session_state(&self) -> SessionState {
        self.sessions.state()
    }

    pub fn polling_enabled(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Let the poll loop start draining inbound traffic.
    pub fn enable_polling(&self) {
        if !self.polling.swap(true, Ordering::AcqRel) {
            debug!("inbound polling enabled");
        }
    }

    pub fn disable_polling(&self) {
        if self.polling.swap(false, Ordering::AcqRel) {
            debug!("inbound polling disabled");
        }
    }

    /// Snapshot of the registered object sets.
    pub fn objects(&self) -> ObjectTable {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn with_objects<T>(&self, f: impl FnOnce(&ObjectTable) -> T) -> T {
        let table = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        f(&table)
    }

    /// Register local and proxy objects with the native layer and replace
    /// the object table used for identifier resolution.
    pub fn register_objects(
        &self,
        local: Vec<ObjectDescriptor>,
        proxy: Vec<ObjectDescriptor>,
    ) -> Result<()> {
        self.bus.register_objects(&local, &proxy)?;
        self.install_objects(ObjectTable::new(local, proxy));
        Ok(())
    }

    /// Replace the object table without telling the native layer.
    pub(crate) fn install_objects(&self, table: ObjectTable) {
        info!(
            local = table.local().len(),
            proxy = table.proxy().len(),
            "object table installed"
        );
        *self.objects.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    /// Add (`RuleOp::Add`) or remove a signal match rule.
    pub fn set_signal_rule(&self, rule: &str, op: RuleOp) -> Result<()> {
        if rule.is_empty() {
            return Err(EngineError::InvalidRequest(
                "signal rule must not be empty".to_string(),
            ));
        }
        self.bus.set_signal_rule(rule, op)?;
        debug!(rule, ?op, "signal rule updated");
        Ok(())
    }

    /// Report the next message carrying `id` to `callback`.
    pub fn add_listener(&self, callback: CallbackId, id: MessageId) -> Result<()> {
        self.registry.register(id, Continuation::Listener { callback });
        self.enable_polling();
        debug!(msg_id = %id, %callback, "listener armed");
        Ok(())
    }

    /// Register `continuation` at `id`, then run `send`.
    ///
    /// The entry exists before the request leaves, so a reply can never
    /// overtake it. If `send` fails the entry is withdrawn.
    pub(crate) fn arm<T>(
        &self,
        id: MessageId,
        continuation: Continuation,
        send: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let displaced = self.registry.register(id, continuation);
        send().inspect_err(|_| {
            self.registry.withdraw(id, displaced);
        })
    }

    pub(crate) fn complete(&self, completion: Completion) {
        self.sink.complete(completion);
    }

    /// Run a claimed continuation against its message and deliver the
    /// outcome. Handler errors become failure completions.
    pub(crate) fn resume(&self, continuation: Continuation, msg: &mut Message) {
        let callback = continuation.callback();
        let label = continuation.label();
        debug!(msg_id = %msg.id, %callback, handler = label, "dispatching to handler");

        let outcome = match continuation {
            Continuation::FoundAdvertisedName { callback } => {
                self.on_found_advertised_name(callback, msg)
            }
            Continuation::JoinSession { callback, name } => {
                self.on_join_reply(callback, &name, msg)
            }
            Continuation::MethodReply {
                callback,
                out_signature,
            } => self.on_method_reply(callback, out_signature.as_ref(), msg),
            Continuation::Listener { callback } => self.on_listener(callback, msg),
        };

        match outcome {
            Ok(completion) => self.complete(completion),
            Err(err) => {
                warn!(msg_id = %msg.id, %callback, handler = label, error = %err, "handler failed");
                self.complete(Completion::failure(callback, err));
            }
        }
    }

    fn on_listener(&self, callback: CallbackId, msg: &mut Message) -> Result<Completion> {
        let signature = Signature::parse_optional(msg.signature.as_deref())?;
        let values = match signature {
            Some(signature) => codec::unmarshal_args(self.bus(), msg, &signature)?,
            None => Vec::new(),
        };
        Ok(Completion::success(callback, Reply::from_message(msg, values.into())))
    }
}

impl<B: NativeBus> std::fmt::Debug for BusConnection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("pending", &self.registry.len())
            .field("session", &self.sessions.state())
            .field("polling", &self.polling_enabled())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
