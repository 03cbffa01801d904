//! Interpreter-agnostic breakpoint model.
//!
//! IDE breakpoint objects are resolved into [`BreakpointDescriptor`]s, which
//! live in a shared [`BreakpointRegistry`]. The registry is the desired
//! breakpoint set: the IDE side writes it, and the interpreter bridge reads it
//! whenever it reconciles a source file against the interpreter's live table.

use crate::errors::{BridgeError, BridgeResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// SOURCE PATH
// ============================================================================

/// Absolute, normalized path of a source unit.
///
/// The interpreter only understands absolute paths, so every path the bridge
/// stores or compares goes through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct SourcePath(PathBuf);

impl SourcePath {
    /// Normalize an absolute path. Existing files are canonicalized, anything
    /// else is cleaned lexically.
    pub fn new(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(BridgeError::RelativePath(path.to_path_buf()));
        }

        let normalized = std::fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path));
        Ok(Self(normalized))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

impl TryFrom<PathBuf> for SourcePath {
    type Error = BridgeError;

    fn try_from(path: PathBuf) -> BridgeResult<Self> {
        Self::new(path)
    }
}

impl From<SourcePath> for PathBuf {
    fn from(path: SourcePath) -> Self {
        path.0
    }
}

impl AsRef<Path> for SourcePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

// ============================================================================
// IDE BREAKPOINT
// ============================================================================

/// A breakpoint object owned by the host IDE's breakpoint store.
///
/// Every accessor may fail; resolution recovers field by field.
pub trait IdeBreakpoint: Send + Sync {
    /// Model identifier of the breakpoint kind.
    fn model_id(&self) -> &str;

    /// Absolute location of the marker's resource.
    fn source_path(&self) -> BridgeResult<PathBuf>;

    /// 1-based line number for line breakpoints.
    fn line_number(&self) -> BridgeResult<u32>;

    /// Optional condition expression.
    fn condition(&self) -> BridgeResult<Option<String>> {
        Ok(None)
    }

    /// Whether the breakpoint is currently enabled in the IDE.
    fn is_enabled(&self) -> BridgeResult<bool>;

    /// Stable identity of the breakpoint's marker in the IDE store.
    ///
    /// Survives line moves, so the registry can follow a breakpoint whose
    /// line changed. Without it breakpoints are tracked by location only.
    fn marker_id(&self) -> Option<u64> {
        None
    }
}

// ============================================================================
// BREAKPOINT DESCRIPTOR
// ============================================================================

/// Identity of a breakpoint within one interpreter session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakpointKey {
    pub file: SourcePath,
    pub line: Option<u32>,
}

impl fmt::Display for BreakpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.file, line),
            None => write!(f, "{}:?", self.file),
        }
    }
}

/// Normalized breakpoint handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointDescriptor {
    /// Absolute source file
    pub file: SourcePath,

    /// 1-based line, `None` when the IDE could not report one
    pub line: Option<u32>,

    /// Condition expression, forwarded opaquely
    pub condition: Option<String>,

    /// Number of hits to ignore before suspending, forwarded opaquely
    pub hit_count: u32,

    /// One-shot breakpoint
    pub temporary: bool,

    /// Disabled breakpoints stay in the registry but are never installed
    pub enabled: bool,

    /// IDE marker owning this breakpoint
    #[serde(default)]
    pub marker: Option<u64>,
}

impl BreakpointDescriptor {
    /// Create an enabled line breakpoint
    pub fn new(file: SourcePath, line: u32) -> Self {
        Self {
            file,
            line: (line > 0).then_some(line),
            condition: None,
            hit_count: 0,
            temporary: false,
            enabled: true,
            marker: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_hit_count(mut self, hit_count: u32) -> Self {
        self.hit_count = hit_count;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_marker(mut self, marker: u64) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn key(&self) -> BreakpointKey {
        BreakpointKey {
            file: self.file.clone(),
            line: self.line,
        }
    }

    /// Resolve an IDE breakpoint.
    ///
    /// Only the source path is mandatory. A failing line or condition lookup
    /// leaves the field at its default, and a failing enabled check marks the
    /// descriptor disabled.
    pub fn resolve(breakpoint: &dyn IdeBreakpoint) -> BridgeResult<Self> {
        let path = breakpoint.source_path().map_err(|e| {
            BridgeError::BreakpointResolution(format!("no source location: {}", e))
        })?;
        let file = SourcePath::new(path)?;

        let line = match breakpoint.line_number() {
            Ok(0) => None,
            Ok(line) => Some(line),
            Err(e) => {
                debug!("Line number unavailable for breakpoint in {}: {}", file, e);
                None
            }
        };

        let condition = breakpoint.condition().unwrap_or_else(|e| {
            debug!("Condition unavailable for breakpoint in {}: {}", file, e);
            None
        });

        let enabled = breakpoint.is_enabled().unwrap_or(false);

        Ok(Self {
            file,
            line,
            condition,
            hit_count: 0,
            temporary: false,
            enabled,
            marker: breakpoint.marker_id(),
        })
    }

    /// Copy the mutable attributes of `other` into `self`.
    ///
    /// Returns true if anything changed.
    pub fn update_from(&mut self, other: &BreakpointDescriptor) -> bool {
        let changed = self.condition != other.condition
            || self.hit_count != other.hit_count
            || self.temporary != other.temporary
            || self.enabled != other.enabled;

        if changed {
            self.condition = other.condition.clone();
            self.hit_count = other.hit_count;
            self.temporary = other.temporary;
            self.enabled = other.enabled;
        }
        changed
    }
}

impl fmt::Display for BreakpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())?;
        if let Some(condition) = &self.condition {
            write!(f, " if {}", condition)?;
        }
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

// ============================================================================
// BREAKPOINT REGISTRY
// ============================================================================

/// Outcome of [`BreakpointRegistry::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
    /// The marker's breakpoint moved; carries the entry it replaced
    Moved(BreakpointDescriptor),
}

#[derive(Debug, Default)]
struct RegistryEntries {
    by_key: BTreeMap<BreakpointKey, BreakpointDescriptor>,
    /// Which key each IDE marker currently occupies
    markers: HashMap<u64, BreakpointKey>,
}

impl RegistryEntries {
    fn remove_key(&mut self, key: &BreakpointKey) -> Option<BreakpointDescriptor> {
        self.markers.retain(|_, owned| owned != key);
        self.by_key.remove(key)
    }
}

/// Shared desired-breakpoint set, keyed by (file, line).
#[derive(Debug, Clone, Default)]
pub struct BreakpointRegistry {
    entries: Arc<RwLock<RegistryEntries>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, or update the existing one with the same key in place.
    ///
    /// A descriptor whose marker already owns an entry at another key
    /// replaces that entry.
    pub fn upsert(&self, descriptor: BreakpointDescriptor) -> Upsert {
        let key = descriptor.key();
        let mut entries = self.entries.write();

        if let Some(marker) = descriptor.marker {
            let previous_key = entries.markers.get(&marker).cloned();
            if let Some(previous_key) = previous_key.filter(|previous| previous != &key) {
                let previous = entries.remove_key(&previous_key);
                entries.markers.insert(marker, key.clone());
                debug!("Breakpoint moved from {} to {}", previous_key, key);
                entries.by_key.insert(key, descriptor);
                return match previous {
                    Some(previous) => Upsert::Moved(previous),
                    None => Upsert::Inserted,
                };
            }
            entries.markers.insert(marker, key.clone());
        }

        match entries.by_key.get_mut(&key) {
            Some(existing) => {
                if existing.update_from(&descriptor) {
                    Upsert::Updated
                } else {
                    Upsert::Unchanged
                }
            }
            None => {
                entries.by_key.insert(key, descriptor);
                Upsert::Inserted
            }
        }
    }

    pub fn remove(&self, key: &BreakpointKey) -> Option<BreakpointDescriptor> {
        let removed = self.entries.write().remove_key(key);
        if removed.is_none() {
            warn!("Removing unknown breakpoint {}", key);
        }
        removed
    }

    /// Remove the entry owned by `descriptor`'s marker, falling back to its
    /// location when the marker is unknown.
    pub fn remove_breakpoint(
        &self,
        descriptor: &BreakpointDescriptor,
    ) -> Option<BreakpointDescriptor> {
        let owned = descriptor
            .marker
            .and_then(|marker| self.entries.read().markers.get(&marker).cloned());
        self.remove(&owned.unwrap_or_else(|| descriptor.key()))
    }

    pub fn get(&self, key: &BreakpointKey) -> Option<BreakpointDescriptor> {
        self.entries.read().by_key.get(key).cloned()
    }

    /// All descriptors of one source file, enabled or not
    pub fn for_file(&self, file: &SourcePath) -> Vec<BreakpointDescriptor> {
        self.entries
            .read()
            .by_key
            .values()
            .filter(|bp| &bp.file == file)
            .cloned()
            .collect()
    }

    /// Enabled descriptors of one source file, in line order
    pub fn enabled_for(&self, file: &SourcePath) -> Vec<BreakpointDescriptor> {
        self.entries
            .read()
            .by_key
            .values()
            .filter(|bp| bp.enabled && &bp.file == file)
            .cloned()
            .collect()
    }

    /// Every enabled descriptor
    pub fn enabled(&self) -> Vec<BreakpointDescriptor> {
        self.entries
            .read()
            .by_key
            .values()
            .filter(|bp| bp.enabled)
            .cloned()
            .collect()
    }

    /// Drop every descriptor owned by `file` and return them.
    pub fn unload_file(&self, file: &SourcePath) -> Vec<BreakpointDescriptor> {
        let mut entries = self.entries.write();
        let keys: Vec<_> = entries
            .by_key
            .keys()
            .filter(|key| &key.file == file)
            .cloned()
            .collect();
        keys.iter().filter_map(|key| entries.remove_key(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBreakpoint {
        path: Option<&'static str>,
        line: Option<u32>,
        condition: Option<&'static str>,
        enabled: Option<bool>,
    }

    impl IdeBreakpoint for FakeBreakpoint {
        fn model_id(&self) -> &str {
            "test.line"
        }

        fn source_path(&self) -> BridgeResult<PathBuf> {
            self.path
                .map(PathBuf::from)
                .ok_or_else(|| BridgeError::BreakpointResolution("marker deleted".into()))
        }

        fn line_number(&self) -> BridgeResult<u32> {
            self.line
                .ok_or_else(|| BridgeError::BreakpointResolution("no line attribute".into()))
        }

        fn condition(&self) -> BridgeResult<Option<String>> {
            Ok(self.condition.map(String::from))
        }

        fn is_enabled(&self) -> BridgeResult<bool> {
            self.enabled
                .ok_or_else(|| BridgeError::BreakpointResolution("marker gone".into()))
        }
    }

    fn path(p: &str) -> SourcePath {
        SourcePath::new(p).unwrap()
    }

    #[test]
    fn test_source_path_rejects_relative() {
        let err = SourcePath::new("scripts/a.py").unwrap_err();
        assert!(matches!(err, BridgeError::RelativePath(_)));
    }

    #[test]
    fn test_source_path_normalizes_lexically() {
        let p = path("/ws/./lib/../a.py");
        assert_eq!(p.as_path(), Path::new("/ws/a.py"));
        assert_eq!(p, path("/ws/a.py"));
    }

    #[test]
    fn test_resolve_full_breakpoint() {
        let bp = FakeBreakpoint {
            path: Some("/ws/a.py"),
            line: Some(10),
            condition: Some("x > 3"),
            enabled: Some(true),
        };

        let desc = BreakpointDescriptor::resolve(&bp).unwrap();
        assert_eq!(desc.file, path("/ws/a.py"));
        assert_eq!(desc.line, Some(10));
        assert_eq!(desc.condition.as_deref(), Some("x > 3"));
        assert!(desc.enabled);
        assert!(!desc.temporary);
    }

    #[test]
    fn test_resolve_recovers_missing_line() {
        let bp = FakeBreakpoint {
            path: Some("/ws/a.py"),
            line: None,
            condition: None,
            enabled: Some(true),
        };

        let desc = BreakpointDescriptor::resolve(&bp).unwrap();
        assert_eq!(desc.line, None);
        assert!(desc.enabled);
        assert_eq!(desc.key().to_string(), "/ws/a.py:?");
    }

    #[test]
    fn test_resolve_failed_enabled_check_means_disabled() {
        let bp = FakeBreakpoint {
            path: Some("/ws/a.py"),
            line: Some(3),
            condition: None,
            enabled: None,
        };

        let desc = BreakpointDescriptor::resolve(&bp).unwrap();
        assert!(!desc.enabled);
    }

    #[test]
    fn test_resolve_without_path_fails() {
        let bp = FakeBreakpoint {
            path: None,
            line: Some(3),
            condition: None,
            enabled: Some(true),
        };

        assert!(matches!(
            BreakpointDescriptor::resolve(&bp),
            Err(BridgeError::BreakpointResolution(_))
        ));
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let registry = BreakpointRegistry::new();
        let first = BreakpointDescriptor::new(path("/ws/a.py"), 10);
        let second = BreakpointDescriptor::new(path("/ws/a.py"), 10).with_condition("i == 2");

        assert_eq!(registry.upsert(first.clone()), Upsert::Inserted);
        assert_eq!(registry.upsert(second), Upsert::Updated);
        assert_eq!(registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 10).with_condition("i == 2")), Upsert::Unchanged);
        assert_eq!(registry.len(), 1);

        let stored = registry.get(&first.key()).unwrap();
        assert_eq!(stored.condition.as_deref(), Some("i == 2"));
    }

    #[test]
    fn test_enabled_for_filters_file_and_state() {
        let registry = BreakpointRegistry::new();
        registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 4));
        registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 2));
        registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 7).disabled());
        registry.upsert(BreakpointDescriptor::new(path("/ws/b.py"), 1));

        let lines: Vec<_> = registry
            .enabled_for(&path("/ws/a.py"))
            .into_iter()
            .map(|bp| bp.line)
            .collect();
        assert_eq!(lines, vec![Some(2), Some(4)]);
        assert_eq!(registry.for_file(&path("/ws/a.py")).len(), 3);
        assert_eq!(registry.enabled().len(), 3);
    }

    #[test]
    fn test_unload_file() {
        let registry = BreakpointRegistry::new();
        registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 1));
        registry.upsert(BreakpointDescriptor::new(path("/ws/a.py"), 2));
        registry.upsert(BreakpointDescriptor::new(path("/ws/b.py"), 1));

        assert_eq!(registry.unload_file(&path("/ws/a.py")).len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.for_file(&path("/ws/a.py")).is_empty());
    }

    #[test]
    fn test_marker_follows_line_move() {
        let registry = BreakpointRegistry::new();
        let file = path("/ws/a.py");
        registry.upsert(BreakpointDescriptor::new(file.clone(), 10).with_marker(7));

        let moved = BreakpointDescriptor::new(file.clone(), 12).with_marker(7);
        match registry.upsert(moved.clone()) {
            Upsert::Moved(previous) => assert_eq!(previous.line, Some(10)),
            other => panic!("expected a move, got {:?}", other),
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.for_file(&file)[0].line, Some(12));

        // The IDE may report the removal with the old location
        let stale = BreakpointDescriptor::new(file.clone(), 10).with_marker(7);
        assert_eq!(registry.remove_breakpoint(&stale).unwrap().line, Some(12));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_by_location_forgets_marker() {
        let registry = BreakpointRegistry::new();
        let file = path("/ws/a.py");
        registry.upsert(BreakpointDescriptor::new(file.clone(), 3).with_marker(1));
        registry.remove(&BreakpointDescriptor::new(file.clone(), 3).key());

        registry.upsert(BreakpointDescriptor::new(file.clone(), 3).with_marker(2));
        assert_eq!(
            registry.upsert(BreakpointDescriptor::new(file.clone(), 8).with_marker(1)),
            Upsert::Inserted
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_descriptor_display() {
        let desc = BreakpointDescriptor::new(path("/ws/a.py"), 10)
            .with_condition("x")
            .disabled();
        assert_eq!(desc.to_string(), "/ws/a.py:10 if x (disabled)");
    }
}
