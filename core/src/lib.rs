// Debridge: in-process debug bridge between an IDE and a script interpreter
// Core library providing the event relay, breakpoint reconciliation and session wiring

pub mod breakpoint;
pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod logging;
pub mod session;
pub mod target;
pub mod tracer;

// Re-export commonly used types
pub use errors::{BridgeError, BridgeResult};

pub use breakpoint::{
    BreakpointDescriptor, BreakpointKey, BreakpointRegistry, IdeBreakpoint, SourcePath, Upsert,
};

pub use events::{
    DebugEvent, InterpreterThread, Route, ScriptHandle, ScriptSource, StackFrame, StepKind,
    SuspendReason,
};

pub use dispatcher::{
    DispatchStatistics, Dispatcher, DispatcherHandle, EventProcessor, EventQueue, EventReceiver,
};

pub use bridge::{
    DebuggerHook, InterpreterBridge, InterpreterCallbacks, InterpreterCommand, ScriptInterpreter,
};

pub use target::{BreakpointSource, DebugEventSink, DebugTarget, SteppableTarget, TargetState};

pub use session::{DebugSession, Launch, SessionInfo};

pub use tracer::{ScriptTracer, TraceOutcome, TracedBreakpoint};

pub use config::{BridgeConfig, ConfigManager, DebuggerConfig, DispatchConfig, LoggingConfig};

pub use logging::init_logging;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
