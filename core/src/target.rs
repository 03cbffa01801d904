//! IDE-side debug target.
//!
//! The target owns the IDE's view of one interpreter run: its lifecycle
//! state, the frames of the current suspension and the scripts seen so far.
//! Breakpoint store callbacks and UI actions are turned into events on the
//! queue; interpreter notifications come back through [`EventProcessor`].

use crate::breakpoint::{BreakpointDescriptor, BreakpointRegistry, IdeBreakpoint, SourcePath, Upsert};
use crate::config::DebuggerConfig;
use crate::dispatcher::{EventProcessor, EventQueue};
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{DebugEvent, Route, ScriptHandle, StackFrame, StepKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// TARGET STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetState {
    /// Target exists, interpreter not started yet
    Created,

    /// Interpreter executing
    Running,

    /// Interpreter stopped, frames available
    Suspended,

    /// Interpreter finished
    Terminated,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Created => write!(f, "Created"),
            TargetState::Running => write!(f, "Running"),
            TargetState::Suspended => write!(f, "Suspended"),
            TargetState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl TargetState {
    pub fn can_transition_to(&self, target: TargetState) -> bool {
        match (self, &target) {
            (TargetState::Created, TargetState::Running) => true,
            (TargetState::Created, TargetState::Terminated) => true,

            (TargetState::Running, TargetState::Suspended) => true,
            (TargetState::Running, TargetState::Terminated) => true,

            (TargetState::Suspended, TargetState::Running) => true,
            (TargetState::Suspended, TargetState::Terminated) => true,

            // Terminal
            (TargetState::Terminated, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetState::Terminated)
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Enumerates the IDE's stored breakpoints.
pub trait BreakpointSource: Send + Sync {
    /// All breakpoints of the given model kind
    fn breakpoints(&self, model_id: &str) -> Vec<Arc<dyn IdeBreakpoint>>;
}

/// IDE UI updates.
pub trait DebugEventSink: Send + Sync {
    fn target_created(&self, name: &str);

    /// Called on the dispatch thread after the target applied `event`
    fn deliver(&self, event: &DebugEvent, state: TargetState);
}

/// Execution control offered to the IDE.
pub trait SteppableTarget {
    fn step_into(&self) -> BridgeResult<()>;
    fn step_over(&self) -> BridgeResult<()>;
    fn step_return(&self) -> BridgeResult<()>;
    fn resume(&self) -> BridgeResult<()>;
    fn terminate(&self) -> BridgeResult<()>;

    /// Frames of the current suspension, innermost first
    fn suspended_frames(&self) -> Vec<StackFrame>;
}

// ============================================================================
// DEBUG TARGET
// ============================================================================

pub struct DebugTarget {
    name: String,
    model_id: String,
    show_dynamic_code: bool,
    queue: EventQueue,
    breakpoints: BreakpointRegistry,
    source: Arc<dyn BreakpointSource>,
    sink: Arc<dyn DebugEventSink>,
    state: RwLock<TargetState>,
    frames: RwLock<Vec<StackFrame>>,
    scripts: RwLock<Vec<ScriptHandle>>,
}

impl DebugTarget {
    /// Create the target and notify the IDE of its creation
    pub fn new(
        config: &DebuggerConfig,
        queue: EventQueue,
        breakpoints: BreakpointRegistry,
        source: Arc<dyn BreakpointSource>,
        sink: Arc<dyn DebugEventSink>,
    ) -> Self {
        let target = Self {
            name: config.target_name.clone(),
            model_id: config.breakpoint_model_id.clone(),
            show_dynamic_code: config.show_dynamic_code,
            queue,
            breakpoints,
            source,
            sink,
            state: RwLock::new(TargetState::Created),
            frames: RwLock::new(Vec::new()),
            scripts: RwLock::new(Vec::new()),
        };
        target.sink.target_created(&target.name);
        target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TargetState {
        *self.state.read()
    }

    pub fn supports_breakpoint(&self, model_id: &str) -> bool {
        model_id == self.model_id
    }

    /// Breakpoints registered for the script's file
    pub fn breakpoints(&self, script: &ScriptHandle) -> Vec<BreakpointDescriptor> {
        match script.path() {
            Some(path) => self.breakpoints.for_file(path),
            None => Vec::new(),
        }
    }

    /// Scripts reported by the interpreter so far
    pub fn scripts(&self) -> Vec<ScriptHandle> {
        self.scripts.read().clone()
    }

    /// Seed the registry from the IDE's breakpoint store.
    ///
    /// Breakpoints without a resolvable file are skipped.
    pub fn load_breakpoints(&self) -> usize {
        let mut loaded = 0;
        for breakpoint in self.source.breakpoints(&self.model_id) {
            match BreakpointDescriptor::resolve(breakpoint.as_ref()) {
                Ok(descriptor) => {
                    self.breakpoints.upsert(descriptor);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping breakpoint: {}", e),
            }
        }
        debug!("Loaded {} breakpoint(s) from the IDE", loaded);
        loaded
    }

    // ========================================================================
    // BREAKPOINT STORE CALLBACKS
    // ========================================================================

    pub fn breakpoint_added(&self, breakpoint: &dyn IdeBreakpoint) -> BridgeResult<()> {
        if !self.supports_breakpoint(breakpoint.model_id()) {
            return Ok(());
        }
        let descriptor = BreakpointDescriptor::resolve(breakpoint)?;
        self.breakpoints.upsert(descriptor.clone());
        self.queue.enqueue(DebugEvent::BreakpointAdded(descriptor));
        Ok(())
    }

    pub fn breakpoint_removed(&self, breakpoint: &dyn IdeBreakpoint) -> BridgeResult<()> {
        if !self.supports_breakpoint(breakpoint.model_id()) {
            return Ok(());
        }
        let descriptor = BreakpointDescriptor::resolve(breakpoint)?;
        let removed = self
            .breakpoints
            .remove_breakpoint(&descriptor)
            .unwrap_or(descriptor);
        self.queue.enqueue(DebugEvent::BreakpointRemoved(removed));
        Ok(())
    }

    pub fn breakpoint_changed(&self, breakpoint: &dyn IdeBreakpoint) -> BridgeResult<()> {
        if !self.supports_breakpoint(breakpoint.model_id()) {
            return Ok(());
        }
        let descriptor = BreakpointDescriptor::resolve(breakpoint)?;
        let key = descriptor.key();
        if let Upsert::Moved(previous) = self.breakpoints.upsert(descriptor.clone()) {
            // Same-file moves are covered by reconciling the new location
            if previous.file != descriptor.file {
                self.queue.enqueue(DebugEvent::BreakpointRemoved(previous));
            }
        }
        let current = self.breakpoints.get(&key).unwrap_or(descriptor);
        self.queue.enqueue(DebugEvent::BreakpointChanged(current));
        Ok(())
    }

    /// The IDE unloaded `file`; its breakpoints go with it.
    pub fn source_unloaded(&self, file: &SourcePath) -> usize {
        let removed = self.breakpoints.unload_file(file);
        debug!("Unloaded {} breakpoint(s) of {}", removed.len(), file);
        let count = removed.len();
        // One removal reconciles the whole file
        if let Some(last) = removed.into_iter().last() {
            self.queue.enqueue(DebugEvent::BreakpointRemoved(last));
        }
        count
    }

    /// Ask the interpreter side to re-send the current stack
    pub fn request_stack_frames(&self) {
        self.queue.enqueue(DebugEvent::GetStackFramesRequest);
    }

    fn request_step(&self, kind: StepKind) -> BridgeResult<()> {
        let state = self.state();
        if state != TargetState::Suspended {
            return Err(BridgeError::InvalidState {
                action: kind.to_string(),
                state: state.to_string(),
            });
        }
        self.queue.enqueue(DebugEvent::StepRequest(kind));
        Ok(())
    }

    fn transition(&self, to: TargetState) -> TargetState {
        let mut state = self.state.write();
        if state.can_transition_to(to) {
            if *state != to {
                debug!("Target {}: {} -> {}", self.name, *state, to);
            }
            *state = to;
        } else {
            warn!("Target {}: ignoring transition {} -> {}", self.name, *state, to);
        }
        *state
    }
}

impl SteppableTarget for DebugTarget {
    fn step_into(&self) -> BridgeResult<()> {
        self.request_step(StepKind::StepInto)
    }

    fn step_over(&self) -> BridgeResult<()> {
        self.request_step(StepKind::StepOver)
    }

    fn step_return(&self) -> BridgeResult<()> {
        self.request_step(StepKind::StepReturn)
    }

    fn resume(&self) -> BridgeResult<()> {
        self.request_step(StepKind::Resume)
    }

    /// Terminating a terminated target does nothing.
    fn terminate(&self) -> BridgeResult<()> {
        if self.state().is_terminal() {
            debug!("Target {} already terminated", self.name);
            return Ok(());
        }
        self.queue.enqueue(DebugEvent::TerminateRequest);
        Ok(())
    }

    fn suspended_frames(&self) -> Vec<StackFrame> {
        self.frames.read().clone()
    }
}

impl EventProcessor for DebugTarget {
    fn route(&self) -> Route {
        Route::ToIde
    }

    fn handle_event(&self, event: &DebugEvent) -> BridgeResult<()> {
        let state = match event {
            DebugEvent::EngineStarted => {
                let state = self.transition(TargetState::Running);
                info!("Target {} running", self.name);
                state
            }
            DebugEvent::Suspended { frames, .. } => {
                let state = self.transition(TargetState::Suspended);
                if state == TargetState::Suspended {
                    *self.frames.write() = frames.clone();
                }
                state
            }
            DebugEvent::Resumed { .. } => {
                self.frames.write().clear();
                self.transition(TargetState::Running)
            }
            DebugEvent::ScriptReady { script, .. } => {
                if script.path().is_none() && !self.show_dynamic_code {
                    debug!("Hiding dynamic script {}", script.id);
                    return Ok(());
                }
                self.scripts.write().push(script.clone());
                self.state()
            }
            DebugEvent::EngineTerminated => {
                self.frames.write().clear();
                let state = self.transition(TargetState::Terminated);
                info!("Target {} terminated", self.name);
                state
            }
            DebugEvent::BreakpointAdded(_)
            | DebugEvent::BreakpointRemoved(_)
            | DebugEvent::BreakpointChanged(_)
            | DebugEvent::StepRequest(_)
            | DebugEvent::GetStackFramesRequest
            | DebugEvent::TerminateRequest => return Ok(()),
        };

        self.sink.deliver(event, state);
        Ok(())
    }
}
