//! Reference interpreter-side debugger.
//!
//! [`ScriptTracer`] is the debugger object a line-tracing engine installs in
//! its trace hook. The engine reports frame entry, every executed line and
//! frame exit; the tracer decides when to stop, notifies the bridge and
//! parks the interpreter thread until the IDE sends a resume command.
//!
//! Conditions are stored but never evaluated. Evaluating them needs the
//! engine's expression evaluator, which is not part of this hook surface.

use crate::breakpoint::SourcePath;
use crate::bridge::{DebuggerHook, InterpreterCallbacks, InterpreterCommand};
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{InterpreterThread, StackFrame, SuspendReason};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the engine should do after a trace call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    Continue,
    /// Abort the running script
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    Continue,
    Into,
    /// Stop at the next line at or above this depth
    Over { depth: usize },
    /// Stop at the next line above this depth
    Out { depth: usize },
}

/// One entry of the tracer's breakpoint table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedBreakpoint {
    pub condition: Option<String>,
    /// Hits left to ignore before suspending
    pub ignore: u32,
    pub temporary: bool,
    pub hits: u32,
}

struct TracerState {
    callbacks: Option<Arc<dyn InterpreterCallbacks>>,
    suspend_on_startup: bool,
    suspend_on_script_load: bool,
    breaks: HashMap<SourcePath, BTreeMap<u32, TracedBreakpoint>>,
    mode: StepMode,
    first_line: bool,
    current_file: Option<SourcePath>,
    script_load_pending: bool,
    depth: usize,
    suspended: bool,
    resume: Option<StepMode>,
    quit: bool,
}

impl TracerState {
    /// Decide whether the line at the top of the stack stops execution
    fn stop_reason(&mut self, file: &SourcePath, line: u32) -> Option<SuspendReason> {
        if self.first_line {
            self.first_line = false;
            self.script_load_pending = false;
            if self.suspend_on_startup {
                return Some(SuspendReason::Startup);
            }
        } else if self.script_load_pending {
            self.script_load_pending = false;
            return Some(SuspendReason::ScriptLoad);
        }

        if self.hit_breakpoint(file, line) {
            return Some(SuspendReason::Breakpoint);
        }

        let step_done = match self.mode {
            StepMode::Continue => false,
            StepMode::Into => true,
            StepMode::Over { depth } => self.depth <= depth,
            StepMode::Out { depth } => self.depth < depth,
        };
        step_done.then_some(SuspendReason::StepEnd)
    }

    fn hit_breakpoint(&mut self, file: &SourcePath, line: u32) -> bool {
        let Some(lines) = self.breaks.get_mut(file) else {
            return false;
        };
        let Some(bp) = lines.get_mut(&line) else {
            return false;
        };

        bp.hits += 1;
        if bp.ignore > 0 {
            bp.ignore -= 1;
            return false;
        }
        if bp.temporary {
            lines.remove(&line);
        }
        true
    }
}

pub struct ScriptTracer {
    state: Mutex<TracerState>,
    resumed: Condvar,
}

impl Default for ScriptTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptTracer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TracerState {
                callbacks: None,
                suspend_on_startup: false,
                suspend_on_script_load: false,
                breaks: HashMap::new(),
                mode: StepMode::Continue,
                first_line: true,
                current_file: None,
                script_load_pending: false,
                depth: 0,
                suspended: false,
                resume: None,
                quit: false,
            }),
            resumed: Condvar::new(),
        }
    }

    /// The engine entered a new frame running `file`.
    ///
    /// Switching to a different file reconciles its breakpoints before
    /// returning.
    pub fn enter_frame(&self, file: &SourcePath) {
        let callbacks = {
            let mut state = self.state.lock();
            state.depth += 1;
            if state.current_file.as_ref() == Some(file) {
                return;
            }
            state.current_file = Some(file.clone());
            state.script_load_pending = state.suspend_on_script_load;
            state.callbacks.clone()
        };

        if let Some(callbacks) = callbacks {
            callbacks.on_script_load(file);
        }
    }

    pub fn leave_frame(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
    }

    /// The engine is about to execute the line at the top of `stack`.
    ///
    /// Blocks while suspended.
    pub fn trace_line(&self, stack: &[StackFrame]) -> TraceOutcome {
        let top = match stack.first() {
            Some(frame) => frame,
            None => return TraceOutcome::Continue,
        };
        // Line 0 is the engine's pseudo-line before the first statement
        if top.line < 1 {
            return TraceOutcome::Continue;
        }
        let file = match top.script.path() {
            Some(path) => path,
            None => return TraceOutcome::Continue,
        };

        let (reason, callbacks) = {
            let mut state = self.state.lock();
            if state.quit {
                return TraceOutcome::Quit;
            }
            let reason = match state.stop_reason(file, top.line) {
                Some(reason) => reason,
                None => return TraceOutcome::Continue,
            };
            state.suspended = true;
            state.resume = None;
            state.mode = StepMode::Continue;
            (reason, state.callbacks.clone())
        };

        trace!("Stopping at {}:{} ({:?})", file, top.line, reason);
        if let Some(callbacks) = &callbacks {
            callbacks.on_suspend(InterpreterThread::current(), stack.to_vec(), reason);
        }

        let mut state = self.state.lock();
        while state.resume.is_none() && !state.quit {
            self.resumed.wait(&mut state);
        }
        state.suspended = false;
        if state.quit {
            return TraceOutcome::Quit;
        }
        if let Some(mode) = state.resume.take() {
            state.mode = mode;
        }
        TraceOutcome::Continue
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Installed breakpoint lines of `file`
    pub fn breakpoint_lines(&self, file: &SourcePath) -> Vec<u32> {
        self.state
            .lock()
            .breaks
            .get(file)
            .map(|lines| lines.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn breakpoint(&self, file: &SourcePath, line: u32) -> Option<TracedBreakpoint> {
        self.state
            .lock()
            .breaks
            .get(file)
            .and_then(|lines| lines.get(&line).cloned())
    }

    fn request_resume(&self, state: &mut TracerState, mode: StepMode) {
        if !state.suspended {
            debug!("Ignoring resume request while running");
            return;
        }
        state.resume = Some(mode);
        self.resumed.notify_all();
    }
}

impl DebuggerHook for ScriptTracer {
    fn attach(&self, callbacks: Arc<dyn InterpreterCallbacks>) -> BridgeResult<()> {
        self.state.lock().callbacks = Some(callbacks);
        Ok(())
    }

    fn invoke(&self, command: InterpreterCommand) -> BridgeResult<()> {
        let mut state = self.state.lock();
        match command {
            InterpreterCommand::SetSuspendOnStartup { enabled } => {
                state.suspend_on_startup = enabled;
            }
            InterpreterCommand::SetSuspendOnScriptLoad { enabled } => {
                state.suspend_on_script_load = enabled;
            }
            InterpreterCommand::SetBreak { breakpoint } => {
                let line = breakpoint.line.ok_or_else(|| {
                    BridgeError::command_failed(
                        "set_break",
                        format!("no line for breakpoint in {}", breakpoint.file),
                    )
                })?;
                state.breaks.entry(breakpoint.file).or_default().insert(
                    line,
                    TracedBreakpoint {
                        condition: breakpoint.condition,
                        ignore: breakpoint.hit_count,
                        temporary: breakpoint.temporary,
                        hits: 0,
                    },
                );
            }
            InterpreterCommand::ClearFileBreaks { file } => {
                state.breaks.remove(&file);
            }
            InterpreterCommand::StepInto => self.request_resume(&mut state, StepMode::Into),
            InterpreterCommand::StepOver => {
                let depth = state.depth;
                self.request_resume(&mut state, StepMode::Over { depth });
            }
            InterpreterCommand::StepOut => {
                let depth = state.depth;
                self.request_resume(&mut state, StepMode::Out { depth });
            }
            InterpreterCommand::Continue => self.request_resume(&mut state, StepMode::Continue),
            InterpreterCommand::Quit => {
                state.quit = true;
                self.resumed.notify_all();
            }
        }
        Ok(())
    }
}
