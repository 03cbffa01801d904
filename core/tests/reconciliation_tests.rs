//! Breakpoint reconciliation tests
//!
//! Drive the interpreter bridge against a recording hook (to check the exact
//! command sequence) and against the reference tracer (to check the
//! effective breakpoint table).

mod common;

use common::*;
use debridge_core::*;
use std::sync::Arc;

fn bridge_with(
    hook: Arc<dyn DebuggerHook>,
    registry: BreakpointRegistry,
) -> (Arc<InterpreterBridge>, EventQueue, EventReceiver) {
    let (queue, receiver) = EventQueue::channel();
    let bridge = Arc::new(InterpreterBridge::new(
        &config(false).debugger,
        queue.clone(),
        registry,
    ));
    bridge.setup(&FakeInterpreter::with_hook(hook)).unwrap();
    (bridge, queue, receiver)
}

// ============================================================================
// COMMAND SEQUENCES
// ============================================================================

#[test]
fn test_script_load_clears_then_installs_single_breakpoint() {
    let registry = BreakpointRegistry::new();
    let hook = Arc::new(RecordingHook::default());
    let (bridge, _queue, _receiver) = bridge_with(hook.clone(), registry.clone());
    hook.clear();

    registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 10));
    bridge.on_script_load(&path("/ws/a.py"));

    let calls = hook.calls();
    assert_eq!(
        calls[0],
        InterpreterCommand::ClearFileBreaks {
            file: path("/ws/a.py")
        }
    );
    let installs: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            InterpreterCommand::SetBreak { breakpoint } => Some(breakpoint.line),
            _ => None,
        })
        .collect();
    assert_eq!(installs, vec![Some(10)]);
}

#[test]
fn test_disabled_breakpoints_are_never_sent() {
    let registry = BreakpointRegistry::new();
    registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 3).disabled());
    let hook = Arc::new(RecordingHook::default());
    let (bridge, _queue, _receiver) = bridge_with(hook.clone(), registry);

    bridge.reconcile(&path("/ws/a.py"));

    assert!(hook
        .calls()
        .iter()
        .all(|c| !matches!(c, InterpreterCommand::SetBreak { .. })));
}

#[test]
fn test_breakpoint_events_reconcile_through_dispatcher() {
    let registry = BreakpointRegistry::new();
    let hook = Arc::new(RecordingHook::default());
    let (bridge, queue, receiver) = bridge_with(hook.clone(), registry.clone());
    hook.clear();

    let added = BreakpointDescriptor::new(path("/ws/b.py"), 7);
    registry.upsert(added.clone());
    queue.enqueue(DebugEvent::BreakpointAdded(added.clone()));
    queue.close();

    let mut dispatcher = Dispatcher::new(receiver);
    dispatcher.register(bridge.clone());
    dispatcher.run();

    registry.remove(&added.key());
    bridge
        .handle_event(&DebugEvent::BreakpointRemoved(added))
        .unwrap();

    let file = path("/ws/b.py");
    assert_eq!(
        hook.calls(),
        vec![
            InterpreterCommand::ClearFileBreaks { file: file.clone() },
            InterpreterCommand::SetBreak {
                breakpoint: BreakpointDescriptor::new(file.clone(), 7)
            },
            InterpreterCommand::ClearFileBreaks { file },
        ]
    );
}

// ============================================================================
// EFFECTIVE INTERPRETER STATE
// ============================================================================

#[test]
fn test_readding_same_key_updates_in_place() {
    let registry = BreakpointRegistry::new();
    let tracer = Arc::new(ScriptTracer::new());
    let (bridge, _queue, _receiver) = bridge_with(tracer.clone(), registry.clone());
    let file = path("/ws/a.py");

    registry.upsert(BreakpointDescriptor::new(file.clone(), 5));
    bridge.reconcile(&file);
    registry.upsert(BreakpointDescriptor::new(file.clone(), 5).with_condition("n > 1"));
    bridge.reconcile(&file);

    assert_eq!(registry.len(), 1);
    assert_eq!(tracer.breakpoint_lines(&file), vec![5]);
    assert_eq!(
        tracer.breakpoint(&file, 5).unwrap().condition.as_deref(),
        Some("n > 1")
    );
}

#[test]
fn test_reconcile_is_idempotent() {
    let registry = BreakpointRegistry::new();
    let tracer = Arc::new(ScriptTracer::new());
    let (bridge, _queue, _receiver) = bridge_with(tracer.clone(), registry.clone());
    let file = path("/ws/a.py");

    registry.upsert(BreakpointDescriptor::new(file.clone(), 2));
    registry.upsert(BreakpointDescriptor::new(file.clone(), 9).with_hit_count(3));

    let first = bridge.reconcile(&file);
    let lines = tracer.breakpoint_lines(&file);
    let second = bridge.reconcile(&file);

    assert_eq!(first, second);
    assert_eq!(tracer.breakpoint_lines(&file), lines);
    assert_eq!(tracer.breakpoint(&file, 9).unwrap().ignore, 3);
}

#[test]
fn test_installed_set_matches_enabled_set_after_edits() {
    let registry = BreakpointRegistry::new();
    let tracer = Arc::new(ScriptTracer::new());
    let (bridge, _queue, _receiver) = bridge_with(tracer.clone(), registry.clone());
    let a = path("/ws/a.py");
    let b = path("/ws/b.py");

    // Interleaved edits on two files; only a.py gets reconciled
    for line in 1..=12u32 {
        registry.upsert(BreakpointDescriptor::new(a.clone(), line));
        registry.upsert(BreakpointDescriptor::new(b.clone(), line));
    }
    for line in (1..=12u32).filter(|l| l % 3 == 0) {
        registry.remove(&BreakpointKey {
            file: a.clone(),
            line: Some(line),
        });
    }
    for line in (1..=12u32).filter(|l| l % 4 == 0) {
        registry.upsert(BreakpointDescriptor::new(a.clone(), line).disabled());
    }
    bridge.reconcile(&a);

    let expected: Vec<u32> = registry
        .enabled_for(&a)
        .iter()
        .filter_map(|bp| bp.line)
        .collect();
    assert_eq!(expected, vec![1, 2, 5, 7, 10, 11]);
    assert_eq!(tracer.breakpoint_lines(&a), expected);
    // b.py was installed at setup time only, before any of its breakpoints existed
    assert!(tracer.breakpoint_lines(&b).is_empty());
}

#[test]
fn test_breakpoints_added_before_engine_start_are_installed_at_setup() {
    let registry = BreakpointRegistry::new();
    let (queue, _receiver) = EventQueue::channel();
    let bridge = Arc::new(InterpreterBridge::new(
        &config(false).debugger,
        queue,
        registry.clone(),
    ));

    registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 4));
    assert_eq!(bridge.reconcile(&path("/ws/a.py")), 0);

    let tracer = Arc::new(ScriptTracer::new());
    bridge
        .setup(&FakeInterpreter::with_hook(tracer.clone()))
        .unwrap();

    assert_eq!(tracer.breakpoint_lines(&path("/ws/a.py")), vec![4]);
}

// ============================================================================
// IDE BREAKPOINT EDITS
// ============================================================================

fn target_for(registry: &BreakpointRegistry, queue: &EventQueue) -> Arc<DebugTarget> {
    let (sink, _rx) = UiSink::new();
    Arc::new(DebugTarget::new(
        &config(false).debugger,
        queue.clone(),
        registry.clone(),
        Arc::new(Store::default()),
        sink,
    ))
}

#[test]
fn test_line_move_then_remove_leaves_nothing_installed() {
    let registry = BreakpointRegistry::new();
    let tracer = Arc::new(ScriptTracer::new());
    let (bridge, queue, receiver) = bridge_with(tracer.clone(), registry.clone());
    let target = target_for(&registry, &queue);
    let file = path("/ws/a.py");

    target
        .breakpoint_added(&LineBreakpoint::marked("/ws/a.py", 10, 1))
        .unwrap();
    bridge.reconcile(&file);
    assert_eq!(tracer.breakpoint_lines(&file), vec![10]);

    // Lines inserted above the breakpoint
    target
        .breakpoint_changed(&LineBreakpoint::marked("/ws/a.py", 12, 1))
        .unwrap();
    bridge.reconcile(&file);
    assert_eq!(tracer.breakpoint_lines(&file), vec![12]);

    target
        .breakpoint_removed(&LineBreakpoint::marked("/ws/a.py", 12, 1))
        .unwrap();
    queue.close();
    let mut dispatcher = Dispatcher::new(receiver);
    dispatcher.register(bridge.clone());
    dispatcher.run();

    assert!(registry.is_empty());
    bridge.on_script_load(&file);
    assert!(tracer.breakpoint_lines(&file).is_empty());
}

#[test]
fn test_unloaded_source_is_cleared_in_interpreter() {
    let registry = BreakpointRegistry::new();
    let tracer = Arc::new(ScriptTracer::new());
    let (bridge, queue, receiver) = bridge_with(tracer.clone(), registry.clone());
    let target = target_for(&registry, &queue);
    let file = path("/ws/a.py");

    target.breakpoint_added(&LineBreakpoint::at("/ws/a.py", 2)).unwrap();
    target.breakpoint_added(&LineBreakpoint::at("/ws/a.py", 6)).unwrap();
    bridge.reconcile(&file);
    assert_eq!(tracer.breakpoint_lines(&file), vec![2, 6]);

    assert_eq!(target.source_unloaded(&file), 2);
    queue.close();
    let mut dispatcher = Dispatcher::new(receiver);
    dispatcher.register(bridge.clone());
    dispatcher.run();

    assert!(tracer.breakpoint_lines(&file).is_empty());
}
