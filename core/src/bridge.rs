//! Interpreter bridge.
//!
//! Owns the interpreter-native debugger object and translates normalized
//! commands into native invocations. Callbacks from the interpreter thread
//! come back through [`InterpreterCallbacks`] and are turned into
//! [`DebugEvent`]s on the event queue.
//!
//! Every command is best-effort: once the native handle is gone (terminated
//! or detached) commands are silently dropped.

use crate::breakpoint::{BreakpointDescriptor, BreakpointRegistry, SourcePath};
use crate::config::DebuggerConfig;
use crate::dispatcher::{EventProcessor, EventQueue};
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{
    DebugEvent, InterpreterThread, Route, ScriptHandle, StackFrame, StepKind, SuspendReason,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

// ============================================================================
// INTERPRETER COMMANDS
// ============================================================================

/// Commands understood by an interpreter-side debugger object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum InterpreterCommand {
    SetSuspendOnStartup { enabled: bool },
    SetSuspendOnScriptLoad { enabled: bool },
    SetBreak { breakpoint: BreakpointDescriptor },
    ClearFileBreaks { file: SourcePath },
    StepInto,
    StepOver,
    StepOut,
    Continue,
    Quit,
}

impl InterpreterCommand {
    /// Name of the native call implementing this command.
    pub fn native_name(&self) -> &'static str {
        match self {
            InterpreterCommand::SetSuspendOnStartup { .. } => "set_suspend_on_startup",
            InterpreterCommand::SetSuspendOnScriptLoad { .. } => "set_suspend_on_script_load",
            InterpreterCommand::SetBreak { .. } => "set_break",
            InterpreterCommand::ClearFileBreaks { .. } => "clear_all_file_breaks",
            InterpreterCommand::StepInto => "step_stepinto",
            InterpreterCommand::StepOver => "step_stepover",
            InterpreterCommand::StepOut => "step_stepout",
            InterpreterCommand::Continue => "step_continue",
            InterpreterCommand::Quit => "step_quit",
        }
    }

    /// Map a resume request onto the interpreter primitive.
    pub fn for_step(kind: StepKind) -> Self {
        match kind {
            StepKind::StepInto => InterpreterCommand::StepInto,
            StepKind::StepOver => InterpreterCommand::StepOver,
            StepKind::StepReturn => InterpreterCommand::StepOut,
            StepKind::Resume | StepKind::ClientRequest => InterpreterCommand::Continue,
        }
    }
}

// ============================================================================
// INTERPRETER-FACING TRAITS
// ============================================================================

/// Callback surface the interpreter-side debugger calls into.
///
/// Both methods run on the interpreter thread.
pub trait InterpreterCallbacks: Send + Sync {
    /// Execution stopped; `frames` are innermost first.
    fn on_suspend(&self, thread: InterpreterThread, frames: Vec<StackFrame>, reason: SuspendReason);

    /// A new source file is about to execute. Blocks until its breakpoints
    /// are installed.
    fn on_script_load(&self, path: &SourcePath);
}

/// Typed adapter over one interpreter's native debugger object.
pub trait DebuggerHook: Send + Sync {
    /// Register the bridge as the debugger sink
    fn attach(&self, callbacks: Arc<dyn InterpreterCallbacks>) -> BridgeResult<()>;

    /// Perform one native call
    fn invoke(&self, command: InterpreterCommand) -> BridgeResult<()>;
}

/// The embedding interpreter, as seen at engine start.
pub trait ScriptInterpreter: Send + Sync {
    /// Add a directory to the module search path unless already present
    fn add_search_path(&self, dir: &Path) -> BridgeResult<()>;

    /// Execute the debugger setup script and return the debugger object it creates
    fn load_debugger(&self, setup_script: &Path) -> BridgeResult<Arc<dyn DebuggerHook>>;
}

#[derive(Debug, Clone)]
struct Suspension {
    thread: InterpreterThread,
    frames: Vec<StackFrame>,
    reason: SuspendReason,
}

// ============================================================================
// INTERPRETER BRIDGE
// ============================================================================

pub struct InterpreterBridge {
    suspend_on_startup: bool,
    suspend_on_script_load: bool,
    support_dir: PathBuf,
    setup_script: String,
    queue: EventQueue,
    breakpoints: BreakpointRegistry,
    hook: RwLock<Option<Arc<dyn DebuggerHook>>>,
    suspension: Mutex<Option<Suspension>>,
    last_thread: Mutex<Option<InterpreterThread>>,
}

impl InterpreterBridge {
    pub fn new(config: &DebuggerConfig, queue: EventQueue, breakpoints: BreakpointRegistry) -> Self {
        Self {
            suspend_on_startup: config.suspend_on_startup,
            suspend_on_script_load: config.suspend_on_script_load,
            support_dir: config.support_dir.clone(),
            setup_script: config.setup_script.clone(),
            queue,
            breakpoints,
            hook: RwLock::new(None),
            suspension: Mutex::new(None),
            last_thread: Mutex::new(None),
        }
    }

    /// Install the debugger into a freshly started interpreter.
    ///
    /// Runs on the interpreter thread before any user script executes. Any
    /// failure is fatal for the session and leaves the bridge detached.
    pub fn setup(self: &Arc<Self>, interpreter: &dyn ScriptInterpreter) -> BridgeResult<()> {
        interpreter
            .add_search_path(&self.support_dir)
            .map_err(|e| BridgeError::SetupFailed(format!("cannot extend search path: {}", e)))?;

        let setup_script = self.support_dir.join(&self.setup_script);
        let hook = interpreter.load_debugger(&setup_script).map_err(|e| {
            BridgeError::SetupFailed(format!(
                "failed to execute {}: {}",
                setup_script.display(),
                e
            ))
        })?;

        let callbacks: Arc<dyn InterpreterCallbacks> = self.clone();
        hook.attach(callbacks)
            .map_err(|e| BridgeError::SetupFailed(format!("cannot register debugger: {}", e)))?;

        for command in [
            InterpreterCommand::SetSuspendOnStartup {
                enabled: self.suspend_on_startup,
            },
            InterpreterCommand::SetSuspendOnScriptLoad {
                enabled: self.suspend_on_script_load,
            },
        ] {
            let name = command.native_name();
            hook.invoke(command)
                .map_err(|e| BridgeError::SetupFailed(format!("{} failed: {}", name, e)))?;
        }

        *self.hook.write() = Some(hook);
        let installed = self.install_all();
        info!(
            installed,
            suspend_on_startup = self.suspend_on_startup,
            suspend_on_script_load = self.suspend_on_script_load,
            "Debugger installed"
        );
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.hook.read().is_some()
    }

    fn current_hook(&self, command: &InterpreterCommand) -> Option<Arc<dyn DebuggerHook>> {
        let hook = self.hook.read().clone();
        if hook.is_none() {
            trace!("No interpreter attached, dropping {}", command.native_name());
        }
        hook
    }

    fn invoke_on(hook: &dyn DebuggerHook, command: InterpreterCommand) -> bool {
        let name = command.native_name();
        match hook.invoke(command) {
            Ok(()) => {
                trace!("Invoked {}", name);
                true
            }
            Err(e) => {
                warn!("Interpreter call {} failed: {}", name, e);
                false
            }
        }
    }

    /// Send one command if the interpreter is still there
    fn fire(&self, command: InterpreterCommand) -> bool {
        match self.current_hook(&command) {
            Some(hook) => Self::invoke_on(hook.as_ref(), command),
            None => false,
        }
    }

    // ========================================================================
    // BREAKPOINT COMMANDS
    // ========================================================================

    /// Install or update one breakpoint. Disabled breakpoints are skipped.
    pub fn set_breakpoint(&self, breakpoint: &BreakpointDescriptor) -> bool {
        if !breakpoint.enabled {
            return false;
        }
        self.fire(InterpreterCommand::SetBreak {
            breakpoint: breakpoint.clone(),
        })
    }

    pub fn clear_breakpoints_for_file(&self, file: &SourcePath) -> bool {
        self.fire(InterpreterCommand::ClearFileBreaks { file: file.clone() })
    }

    /// Bring the interpreter's breakpoints for `file` in line with the registry.
    ///
    /// Returns the number of breakpoints installed. Without an interpreter
    /// this is a no-op; the registry keeps the breakpoints for the next setup.
    pub fn reconcile(&self, file: &SourcePath) -> usize {
        if !self.is_attached() {
            trace!("Deferring breakpoints for {} until engine start", file);
            return 0;
        }

        self.clear_breakpoints_for_file(file);
        let installed = self
            .breakpoints
            .enabled_for(file)
            .iter()
            .filter(|bp| self.set_breakpoint(bp))
            .count();

        debug!("Reconciled {} breakpoint(s) for {}", installed, file);
        installed
    }

    /// Install every enabled breakpoint in the registry
    pub fn install_all(&self) -> usize {
        self.breakpoints
            .enabled()
            .iter()
            .filter(|bp| self.set_breakpoint(bp))
            .count()
    }

    // ========================================================================
    // EXECUTION CONTROL
    // ========================================================================

    /// Issue a resume request and report it as resumed without waiting.
    ///
    /// `Resumed` is queued before the interpreter is released, so it always
    /// precedes the next `Suspended`.
    pub fn step(&self, kind: StepKind) -> bool {
        let command = InterpreterCommand::for_step(kind);
        let hook = match self.current_hook(&command) {
            Some(hook) => hook,
            None => return false,
        };

        self.suspension.lock().take();
        let thread = self.last_thread.lock().clone();
        self.queue.enqueue(DebugEvent::Resumed { thread, step: kind });

        Self::invoke_on(hook.as_ref(), command)
    }

    pub fn step_into(&self) -> bool {
        self.step(StepKind::StepInto)
    }

    pub fn step_over(&self) -> bool {
        self.step(StepKind::StepOver)
    }

    pub fn step_out(&self) -> bool {
        self.step(StepKind::StepReturn)
    }

    pub fn resume(&self) -> bool {
        self.step(StepKind::Resume)
    }

    /// Quit the interpreter-side debugger and drop the handle.
    ///
    /// Returns false if there was nothing to terminate.
    pub fn terminate(&self) -> bool {
        let hook = self.hook.write().take();
        match hook {
            Some(hook) => {
                if let Err(e) = hook.invoke(InterpreterCommand::Quit) {
                    warn!("Interpreter call step_quit failed: {}", e);
                }
                self.suspension.lock().take();
                info!("Debugger terminated");
                true
            }
            None => {
                trace!("Terminate requested without interpreter");
                false
            }
        }
    }

    /// Drop the handle without talking to the interpreter
    pub fn detach(&self) {
        if self.hook.write().take().is_some() {
            debug!("Debugger detached");
        }
        self.suspension.lock().take();
    }

    /// Announce that `script` is about to run under the debugger
    pub fn script_ready(&self, script: ScriptHandle) {
        self.queue.enqueue(DebugEvent::ScriptReady {
            script,
            thread: InterpreterThread::current(),
        });
    }

    /// Re-send the current suspension so the IDE can refresh its stack view
    fn resend_suspension(&self) {
        let suspension = self.suspension.lock().clone();
        match suspension {
            Some(s) => {
                self.queue.enqueue(DebugEvent::Suspended {
                    thread: s.thread,
                    frames: s.frames,
                    reason: s.reason,
                });
            }
            None => debug!("Stack frames requested while not suspended"),
        }
    }
}

impl InterpreterCallbacks for InterpreterBridge {
    fn on_suspend(&self, thread: InterpreterThread, frames: Vec<StackFrame>, reason: SuspendReason) {
        debug!(
            "Suspended on {} with {} frame(s) ({:?})",
            thread,
            frames.len(),
            reason
        );
        *self.last_thread.lock() = Some(thread.clone());
        *self.suspension.lock() = Some(Suspension {
            thread: thread.clone(),
            frames: frames.clone(),
            reason,
        });
        self.queue.enqueue(DebugEvent::Suspended {
            thread,
            frames,
            reason,
        });
    }

    fn on_script_load(&self, path: &SourcePath) {
        debug!("Script loaded: {}", path);
        self.reconcile(path);
    }
}

impl EventProcessor for InterpreterBridge {
    fn route(&self) -> Route {
        Route::ToInterpreter
    }

    fn handle_event(&self, event: &DebugEvent) -> BridgeResult<()> {
        match event {
            DebugEvent::BreakpointAdded(bp)
            | DebugEvent::BreakpointChanged(bp)
            | DebugEvent::BreakpointRemoved(bp) => {
                self.reconcile(&bp.file);
            }
            DebugEvent::StepRequest(kind) => {
                self.step(*kind);
            }
            DebugEvent::GetStackFramesRequest => self.resend_suspension(),
            DebugEvent::TerminateRequest => {
                self.terminate();
            }
            DebugEvent::EngineStarted
            | DebugEvent::EngineTerminated
            | DebugEvent::Suspended { .. }
            | DebugEvent::Resumed { .. }
            | DebugEvent::ScriptReady { .. } => {}
        }
        Ok(())
    }
}
