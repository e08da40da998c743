//! The inbound poll loop.
//!
//! Each tick pulls at most one frame from the native layer and routes it:
//! to the continuation registered for its identifier, or, when nothing is
//! registered, to the native bus handlers. Timeouts and unmatched frames are
//! normal outcomes. Other transport faults are logged and the loop keeps
//! going.

use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thinbus_message::{Message, MessageId};
use thinbus_transport::{NativeBus, TransportError};
use tracing::{debug, trace, warn};

use crate::connection::BusConnection;
use crate::error::{EngineError, Result};

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody has asked for inbound traffic yet.
    Disabled,
    /// Nothing arrived within the unmarshal timeout.
    Idle,
    /// A frame arrived that matched no rule.
    NoMatch,
    /// The frame was handed to its registered continuation.
    Dispatched(MessageId),
    /// No continuation was registered; the native bus handlers got the frame.
    Forwarded(MessageId),
    /// The native layer reported an error.
    Fault,
}

/// An inbound message that is released back to the native layer on drop.
struct InboundFrame<'a, B: NativeBus + ?Sized> {
    bus: &'a B,
    msg: Message,
}

impl<B: NativeBus + ?Sized> Deref for InboundFrame<'_, B> {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.msg
    }
}

impl<B: NativeBus + ?Sized> DerefMut for InboundFrame<'_, B> {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.msg
    }
}

impl<B: NativeBus + ?Sized> Drop for InboundFrame<'_, B> {
    fn drop(&mut self) {
        self.bus.close_msg(&mut self.msg);
    }
}

/// Drains inbound traffic for one [`BusConnection`].
pub struct PollLoop<B: NativeBus> {
    conn: Arc<BusConnection<B>>,
}

impl<B: NativeBus> Clone for PollLoop<B> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

impl<B: NativeBus + 'static> PollLoop<B> {
    pub fn new(conn: Arc<BusConnection<B>>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<BusConnection<B>> {
        &self.conn
    }

    /// Run one poll cycle. Never panics because of a handler.
    pub fn tick(&self) -> TickOutcome {
        let conn = &*self.conn;
        if !conn.polling_enabled() {
            return TickOutcome::Disabled;
        }

        let msg = match conn.bus().unmarshal_msg(conn.config().poll.unmarshal_timeout) {
            Ok(msg) => msg,
            Err(TransportError::Timeout) => {
                trace!("no inbound traffic");
                return TickOutcome::Idle;
            }
            Err(TransportError::NoMatch) => {
                debug!("inbound frame matched no rule");
                return TickOutcome::NoMatch;
            }
            Err(err) => {
                warn!(error = %err, "failed to unmarshal inbound frame");
                return TickOutcome::Fault;
            }
        };

        let mut frame = InboundFrame {
            bus: conn.bus(),
            msg,
        };
        let id = frame.id;
        trace!(msg_id = %id, kind = ?frame.kind, sender = ?frame.sender, "inbound frame");

        match conn.registry().take_and_remove(id) {
            Some(continuation) => {
                let callback = continuation.callback();
                let resumed =
                    panic::catch_unwind(AssertUnwindSafe(|| conn.resume(continuation, &mut frame)));
                if resumed.is_err() {
                    warn!(msg_id = %id, %callback, "handler panicked");
                }
                TickOutcome::Dispatched(id)
            }
            None => {
                debug!(msg_id = %id, "no handler registered, passing to bus handlers");
                if let Err(err) = conn.bus().handle_bus_message(&mut frame) {
                    warn!(msg_id = %id, error = %err, "bus message handler failed");
                }
                TickOutcome::Forwarded(id)
            }
        }
    }

    /// Tick on a dedicated thread at the configured period until the
    /// returned handle is stopped or dropped.
    pub fn spawn(self) -> Result<PollHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let period = self.conn.config().poll.period;

        let thread = thread::Builder::new()
            .name("thinbus-poll".to_string())
            .spawn(move || {
                debug!(period_ms = period.as_millis() as u64, "poll loop started");
                while flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    self.tick();
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
                debug!("poll loop stopped");
            })
            .map_err(EngineError::Spawn)?;

        Ok(PollHandle {
            running,
            thread: Some(thread),
        })
    }

    /// Tick from a tokio interval until `cancel` fires.
    ///
    /// Ticks run on the blocking pool and never overlap; ticks missed while
    /// one was blocked are skipped, not replayed.
    #[cfg(feature = "async")]
    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) {
        use tokio::time::{interval, MissedTickBehavior};

        let mut ticker = interval(self.conn.config().poll.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("async poll loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let poller = self.clone();
                    match tokio::task::spawn_blocking(move || poller.tick()).await {
                        Ok(outcome) => trace!(?outcome, "poll tick finished"),
                        Err(err) => warn!(error = %err, "poll tick task failed"),
                    }
                }
            }
        }
        debug!("async poll loop stopped");
    }
}

/// Stops a spawned poll thread. Dropping the handle stops it too.
#[derive(Debug)]
pub struct PollHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Ask the thread to stop and wait for the current tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("poll thread panicked");
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
