//! Debug session wiring.
//!
//! A [`DebugSession`] lives for exactly one interpreter run. It creates the
//! event queue, the interpreter bridge and the debug target, starts the
//! dispatch thread and coordinates the engine start/end handshake.

use crate::breakpoint::BreakpointRegistry;
use crate::bridge::{InterpreterBridge, ScriptInterpreter};
use crate::config::BridgeConfig;
use crate::dispatcher::{DispatchStatistics, Dispatcher, DispatcherHandle, EventQueue};
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{DebugEvent, ScriptHandle};
use crate::target::{BreakpointSource, DebugEventSink, DebugTarget, TargetState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// The IDE launch a session belongs to.
pub trait Launch: Send + Sync {
    fn add_debug_target(&self, target: Arc<DebugTarget>);
}

/// Snapshot of a session for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub target_name: String,
    pub started_at: DateTime<Utc>,
    pub state: TargetState,
    pub breakpoints: usize,
}

pub struct DebugSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    queue: EventQueue,
    breakpoints: BreakpointRegistry,
    bridge: Arc<InterpreterBridge>,
    target: Arc<DebugTarget>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    terminated: AtomicBool,
}

impl DebugSession {
    /// Build a session, start its dispatch thread and register its target
    /// with the launch.
    pub fn launch(
        config: &BridgeConfig,
        launch: &dyn Launch,
        source: Arc<dyn BreakpointSource>,
        sink: Arc<dyn DebugEventSink>,
    ) -> BridgeResult<Self> {
        let (queue, receiver) = EventQueue::channel();
        let breakpoints = BreakpointRegistry::new();

        let bridge = Arc::new(InterpreterBridge::new(
            &config.debugger,
            queue.clone(),
            breakpoints.clone(),
        ));
        let target = Arc::new(DebugTarget::new(
            &config.debugger,
            queue.clone(),
            breakpoints.clone(),
            source,
            sink,
        ));
        target.load_breakpoints();

        let mut dispatcher = Dispatcher::new(receiver);
        dispatcher.register(bridge.clone());
        dispatcher.register(target.clone());
        let handle = dispatcher.spawn(&config.dispatch.thread_name)?;

        launch.add_debug_target(target.clone());

        let session = Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            queue,
            breakpoints,
            bridge,
            target,
            dispatcher: Mutex::new(Some(handle)),
            terminated: AtomicBool::new(false),
        };
        info!(
            session = %session.id,
            breakpoints = session.breakpoints.len(),
            "Debug session launched"
        );
        Ok(session)
    }

    /// Install the debugger into a started interpreter.
    ///
    /// Must run on the interpreter thread before any user script. A failed
    /// setup ends the session.
    pub fn engine_started(&self, interpreter: &dyn ScriptInterpreter) -> BridgeResult<()> {
        if let Err(e) = self.bridge.setup(interpreter) {
            error!(session = %self.id, "Debugger setup failed: {}", e);
            self.engine_terminated();
            return Err(e);
        }

        self.queue.enqueue(DebugEvent::EngineStarted);
        Ok(())
    }

    /// A script is about to run
    pub fn script_ready(&self, script: ScriptHandle) {
        self.bridge.script_ready(script);
    }

    /// The interpreter finished. Only the first call has an effect.
    pub fn engine_terminated(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.queue.enqueue(DebugEvent::EngineTerminated);
        self.bridge.detach();
        self.queue.close();
        info!(session = %self.id, "Debug session ended");
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the dispatch thread to deliver everything queued before
    /// termination.
    pub fn join(&self) -> BridgeResult<DispatchStatistics> {
        if !self.is_terminated() {
            return Err(BridgeError::InvalidState {
                action: "join".to_string(),
                state: "running".to_string(),
            });
        }

        match self.dispatcher.lock().take() {
            Some(handle) => handle.join(),
            None => Err(BridgeError::DispatcherError(
                "dispatch thread already joined".to_string(),
            )),
        }
    }

    /// Terminate the engine side and wait for the dispatch thread
    pub fn shutdown(&self) -> BridgeResult<DispatchStatistics> {
        self.engine_terminated();
        self.join()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn target(&self) -> &Arc<DebugTarget> {
        &self.target
    }

    pub fn bridge(&self) -> &Arc<InterpreterBridge> {
        &self.bridge
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            target_name: self.target.name().to_string(),
            started_at: self.started_at,
            state: self.target.state(),
            breakpoints: self.breakpoints.len(),
        }
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        // Let the dispatch thread drain and exit
        self.queue.close();
    }
}
