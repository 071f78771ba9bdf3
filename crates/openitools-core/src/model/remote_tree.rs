/// The currently materialized view of the device filesystem.
///
/// Only nodes the user has expanded carry children. Nothing here is a
/// cache: collapsing a node drops its children and the next expansion
/// fetches them again from the device.
use super::fs_entry::{FileKind, FsEntry};
use super::device_path::normalize_device_path;
use std::collections::HashMap;

/// Per-node expansion status tracked by the control context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExpansionState {
    #[default]
    Collapsed,
    /// A listing request is in flight.
    Loading,
    Expanded,
    /// The last listing failed. Siblings are unaffected.
    Failed(String),
}

/// A row in the flattened, depth-first list handed to a tree widget.
#[derive(Clone, Debug, PartialEq)]
pub struct VisibleRow {
    pub path: String,
    /// Nesting depth (0 = root).
    pub depth: u16,
    pub kind: FileKind,
    pub state: ExpansionState,
}

static COLLAPSED: ExpansionState = ExpansionState::Collapsed;

/// Root entry plus per-path expansion state.
#[derive(Debug, Clone)]
pub struct RemoteTree {
    root: FsEntry,
    states: HashMap<String, ExpansionState>,
}

impl Default for RemoteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTree {
    /// A tree holding only the unlisted root directory.
    pub fn new() -> Self {
        Self {
            root: FsEntry::unlisted_dir("/"),
            states: HashMap::new(),
        }
    }

    pub fn root(&self) -> &FsEntry {
        &self.root
    }

    /// Look up a materialized node by device path.
    pub fn find(&self, path: &str) -> Option<&FsEntry> {
        let path = normalize_device_path(path);
        let mut node = &self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.as_ref()?.iter().find(|c| c.name() == segment)?;
        }
        Some(node)
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut FsEntry> {
        let mut node = &mut self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node
                .children
                .as_mut()?
                .iter_mut()
                .find(|c| c.name() == segment)?;
        }
        Some(node)
    }

    pub fn state(&self, path: &str) -> &ExpansionState {
        self.states
            .get(&normalize_device_path(path))
            .unwrap_or(&COLLAPSED)
    }

    /// Mark a directory as having a listing in flight.
    ///
    /// Returns `false` if the path is not a materialized directory.
    pub fn mark_loading(&mut self, path: &str) -> bool {
        let path = normalize_device_path(path);
        if !self.find(&path).is_some_and(FsEntry::is_expandable) {
            return false;
        }
        self.states.insert(path, ExpansionState::Loading);
        true
    }

    /// Replace a directory's children with a fresh listing.
    ///
    /// Returns `false` (and changes nothing) if the node has disappeared
    /// from the tree since the request was issued.
    pub fn apply_expansion(&mut self, path: &str, entries: Vec<FsEntry>) -> bool {
        let path = normalize_device_path(path);
        let Some(node) = self.find_mut(&path) else {
            return false;
        };
        if !node.is_expandable() {
            return false;
        }
        node.children = Some(entries);
        self.forget_descendants(&path);
        self.states.insert(path, ExpansionState::Expanded);
        true
    }

    /// Record a failed listing for one node without touching its siblings.
    pub fn mark_failed(&mut self, path: &str, message: impl Into<String>) -> bool {
        let path = normalize_device_path(path);
        if self.find(&path).is_none() {
            return false;
        }
        self.states
            .insert(path, ExpansionState::Failed(message.into()));
        true
    }

    /// Drop a node's children so the next expansion re-fetches.
    pub fn collapse(&mut self, path: &str) -> bool {
        let path = normalize_device_path(path);
        let Some(node) = self.find_mut(&path) else {
            return false;
        };
        node.children = None;
        self.forget_descendants(&path);
        self.states.remove(&path);
        true
    }

    fn forget_descendants(&mut self, path: &str) {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.states
            .retain(|key, _| key == path || !key.starts_with(&prefix));
    }

    /// Depth-first rows for every materialized node, in listing order.
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        let mut rows = Vec::new();
        self.push_rows(&self.root, 0, &mut rows);
        rows
    }

    fn push_rows(&self, node: &FsEntry, depth: u16, rows: &mut Vec<VisibleRow>) {
        rows.push(VisibleRow {
            path: node.path.clone(),
            depth,
            kind: node.kind,
            state: self.state(&node.path).clone(),
        });
        if let Some(children) = &node.children {
            for child in children {
                self.push_rows(child, depth + 1, rows);
            }
        }
    }
}
