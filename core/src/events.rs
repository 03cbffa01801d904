//! Debug events exchanged between the interpreter bridge and the debug target.

use crate::breakpoint::{BreakpointDescriptor, SourcePath};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::thread::ThreadId;
use uuid::Uuid;

// ============================================================================
// ROUTING
// ============================================================================

/// Which side of the bridge an event travels to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Interpreter → IDE notifications
    ToIde,

    /// IDE → interpreter requests
    ToInterpreter,
}

// ============================================================================
// STEP KIND / SUSPEND REASON
// ============================================================================

/// Kind of resume requested by the IDE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    StepInto,
    StepOver,
    StepReturn,
    /// Plain resume
    Resume,
    /// Resume requested by something other than a stepping action
    ClientRequest,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::StepInto => write!(f, "step into"),
            StepKind::StepOver => write!(f, "step over"),
            StepKind::StepReturn => write!(f, "step return"),
            StepKind::Resume => write!(f, "resume"),
            StepKind::ClientRequest => write!(f, "client request"),
        }
    }
}

impl StepKind {
    pub fn is_step(&self) -> bool {
        matches!(
            self,
            StepKind::StepInto | StepKind::StepOver | StepKind::StepReturn
        )
    }
}

/// Why the interpreter stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    Breakpoint,
    StepEnd,
    Startup,
    ScriptLoad,
    ClientRequest,
}

// ============================================================================
// THREADS, SCRIPTS, FRAMES
// ============================================================================

/// The interpreter thread a suspension happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterThread {
    pub id: ThreadId,
    pub name: Option<String>,
}

impl InterpreterThread {
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            id: thread.id(),
            name: thread.name().map(String::from),
        }
    }
}

impl fmt::Display for InterpreterThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({:?})", name, self.id),
            None => write!(f, "{:?}", self.id),
        }
    }
}

/// Where a script's code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptSource {
    File { path: SourcePath },
    Inline { code: String },
}

/// Reference to a script unit run by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptHandle {
    pub id: Uuid,
    pub source: ScriptSource,
}

impl ScriptHandle {
    pub fn from_file(path: SourcePath) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: ScriptSource::File { path },
        }
    }

    pub fn inline(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: ScriptSource::Inline { code: code.into() },
        }
    }

    /// The backing file, if the script has one
    pub fn path(&self) -> Option<&SourcePath> {
        match &self.source {
            ScriptSource::File { path } => Some(path),
            ScriptSource::Inline { .. } => None,
        }
    }
}

/// A single frame of a suspended interpreter stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Display label, the normalized script path
    pub name: String,

    /// Current line
    pub line: u32,

    /// Local variables; values are interpreter references and never inspected
    pub locals: HashMap<String, serde_json::Value>,

    /// Script unit owning this frame
    pub script: ScriptHandle,
}

impl StackFrame {
    pub fn new(path: SourcePath, line: u32) -> Self {
        Self {
            name: path.to_string(),
            line,
            locals: HashMap::new(),
            script: ScriptHandle::from_file(path),
        }
    }

    pub fn with_locals(mut self, locals: HashMap<String, serde_json::Value>) -> Self {
        self.locals = locals;
        self
    }
}

// ============================================================================
// DEBUG EVENT
// ============================================================================

/// Events relayed through the event queue.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// Interpreter engine started and the debugger is installed
    EngineStarted,

    /// Interpreter engine finished
    EngineTerminated,

    /// Execution stopped; frames are innermost first
    Suspended {
        thread: InterpreterThread,
        frames: Vec<StackFrame>,
        reason: SuspendReason,
    },

    /// Execution continued after a step or resume request
    Resumed {
        thread: Option<InterpreterThread>,
        step: StepKind,
    },

    /// A script is about to be executed under the debugger
    ScriptReady {
        script: ScriptHandle,
        thread: InterpreterThread,
    },

    BreakpointAdded(BreakpointDescriptor),
    BreakpointRemoved(BreakpointDescriptor),
    BreakpointChanged(BreakpointDescriptor),

    StepRequest(StepKind),
    GetStackFramesRequest,
    TerminateRequest,
}

impl DebugEvent {
    pub fn route(&self) -> Route {
        match self {
            DebugEvent::EngineStarted
            | DebugEvent::EngineTerminated
            | DebugEvent::Suspended { .. }
            | DebugEvent::Resumed { .. }
            | DebugEvent::ScriptReady { .. } => Route::ToIde,

            DebugEvent::BreakpointAdded(_)
            | DebugEvent::BreakpointRemoved(_)
            | DebugEvent::BreakpointChanged(_)
            | DebugEvent::StepRequest(_)
            | DebugEvent::GetStackFramesRequest
            | DebugEvent::TerminateRequest => Route::ToInterpreter,
        }
    }

    /// Stable name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            DebugEvent::EngineStarted => "engine_started",
            DebugEvent::EngineTerminated => "engine_terminated",
            DebugEvent::Suspended { .. } => "suspended",
            DebugEvent::Resumed { .. } => "resumed",
            DebugEvent::ScriptReady { .. } => "script_ready",
            DebugEvent::BreakpointAdded(_) => "breakpoint_added",
            DebugEvent::BreakpointRemoved(_) => "breakpoint_removed",
            DebugEvent::BreakpointChanged(_) => "breakpoint_changed",
            DebugEvent::StepRequest(_) => "step_request",
            DebugEvent::GetStackFramesRequest => "get_stack_frames_request",
            DebugEvent::TerminateRequest => "terminate_request",
        }
    }
}
