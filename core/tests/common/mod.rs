//! Shared fixtures for the integration tests
#![allow(dead_code)]

use debridge_core::*;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

pub fn path(p: &str) -> SourcePath {
    SourcePath::new(p).unwrap()
}

/// Hook that records every command it receives
#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<InterpreterCommand>>,
}

impl RecordingHook {
    pub fn calls(&self) -> Vec<InterpreterCommand> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl DebuggerHook for RecordingHook {
    fn attach(&self, _callbacks: Arc<dyn InterpreterCallbacks>) -> BridgeResult<()> {
        Ok(())
    }

    fn invoke(&self, command: InterpreterCommand) -> BridgeResult<()> {
        self.calls.lock().push(command);
        Ok(())
    }
}

/// Interpreter whose setup script yields a fixed debugger object
pub struct FakeInterpreter {
    hook: Option<Arc<dyn DebuggerHook>>,
}

impl FakeInterpreter {
    pub fn with_hook(hook: Arc<dyn DebuggerHook>) -> Self {
        Self { hook: Some(hook) }
    }

    pub fn broken() -> Self {
        Self { hook: None }
    }
}

impl ScriptInterpreter for FakeInterpreter {
    fn add_search_path(&self, _dir: &Path) -> BridgeResult<()> {
        Ok(())
    }

    fn load_debugger(&self, setup_script: &Path) -> BridgeResult<Arc<dyn DebuggerHook>> {
        self.hook.clone().ok_or_else(|| {
            BridgeError::command_failed(
                "execfile",
                format!("{} raised ImportError", setup_script.display()),
            )
        })
    }
}

/// IDE line breakpoint
pub struct LineBreakpoint {
    pub file: &'static str,
    pub line: u32,
    pub enabled: bool,
    pub marker: Option<u64>,
}

impl LineBreakpoint {
    pub fn at(file: &'static str, line: u32) -> Self {
        Self {
            file,
            line,
            enabled: true,
            marker: None,
        }
    }

    pub fn marked(file: &'static str, line: u32, marker: u64) -> Self {
        Self {
            marker: Some(marker),
            ..Self::at(file, line)
        }
    }
}

impl IdeBreakpoint for LineBreakpoint {
    fn model_id(&self) -> &str {
        "debridge.python"
    }

    fn source_path(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from(self.file))
    }

    fn line_number(&self) -> BridgeResult<u32> {
        Ok(self.line)
    }

    fn is_enabled(&self) -> BridgeResult<bool> {
        Ok(self.enabled)
    }

    fn marker_id(&self) -> Option<u64> {
        self.marker
    }
}

#[derive(Default)]
pub struct Store(pub Vec<Arc<dyn IdeBreakpoint>>);

impl BreakpointSource for Store {
    fn breakpoints(&self, model_id: &str) -> Vec<Arc<dyn IdeBreakpoint>> {
        self.0
            .iter()
            .filter(|bp| bp.model_id() == model_id)
            .cloned()
            .collect()
    }
}

/// Sink recording what the IDE would display
pub struct UiSink {
    delivered: Mutex<Vec<(&'static str, TargetState)>>,
    reasons: Mutex<Vec<SuspendReason>>,
    notify: Mutex<mpsc::Sender<&'static str>>,
}

impl UiSink {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<&'static str>) {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            reasons: Mutex::new(Vec::new()),
            notify: Mutex::new(tx),
        });
        (sink, rx)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.delivered.lock().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn delivered(&self) -> Vec<(&'static str, TargetState)> {
        self.delivered.lock().clone()
    }

    /// Reasons of the delivered suspensions, in order
    pub fn reasons(&self) -> Vec<SuspendReason> {
        self.reasons.lock().clone()
    }
}

impl DebugEventSink for UiSink {
    fn target_created(&self, _name: &str) {}

    fn deliver(&self, event: &DebugEvent, state: TargetState) {
        if let DebugEvent::Suspended { reason, .. } = event {
            self.reasons.lock().push(*reason);
        }
        self.delivered.lock().push((event.kind(), state));
        let _ = self.notify.lock().send(event.kind());
    }
}

/// Block until the sink saw an event of `kind`
pub fn wait_for(rx: &mpsc::Receiver<&'static str>, kind: &str) {
    loop {
        let seen = rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap_or_else(|_| panic!("timed out waiting for {}", kind));
        if seen == kind {
            return;
        }
    }
}

pub struct NoLaunch;

impl Launch for NoLaunch {
    fn add_debug_target(&self, _target: Arc<DebugTarget>) {}
}

pub fn config(suspend_on_startup: bool) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.debugger.suspend_on_startup = suspend_on_startup;
    config.debugger.support_dir = PathBuf::from("/opt/debridge/support");
    config
}
