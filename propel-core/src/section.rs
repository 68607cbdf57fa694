//! Section document model: the editable units of a response draft.
//!
//! A response is a set of coarse-grained sections ("Cover Letter",
//! "Technical Approach", ...). Each section is addressed by a stable key
//! derived from its display name. Local edits and inbound remote edits both
//! land here; remote merges never re-broadcast and never disturb a control
//! the local user is actively typing in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derive the stable section key for a display name.
///
/// Lower-cases, collapses runs of non-alphanumeric characters to a single
/// `_`, and strips leading/trailing separators. Applying it to an
/// already-normalized key is a no-op.
pub fn normalize_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                key.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }
    key
}

/// One editable section of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDocument {
    pub display_name: String,
    pub content: String,
    /// Monotonic counter bumped on every local mutation. Used only for
    /// coalescing, never for conflict detection.
    pub local_version: u64,
}

/// A section's state inside a persistence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionState {
    pub display_name: String,
    pub key: String,
    pub content: String,
}

/// Result of merging a remote edit into the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Content replaced; the view may refresh the control.
    Applied,
    /// Content replaced in the model, but the section's control currently
    /// has local focus: leave the visible control untouched until blur and
    /// show a transient attribution note instead.
    Deferred,
    /// Identical content; nothing changed beyond a redundant re-render.
    Unchanged,
}

/// The ordered set of sections for one response document.
///
/// Snapshot order is the last-known section ordering, not content order.
#[derive(Debug, Default)]
pub struct SectionSet {
    sections: HashMap<String, SectionDocument>,
    order: Vec<String>,
    focused: Option<String>,
    deferred: Vec<String>,
}

impl SectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a section under its display name, returning the stable key.
    ///
    /// If two display names normalize to the same key, the later
    /// registration overwrites the earlier display name in the map. This is
    /// accepted, documented behavior.
    pub fn upsert(&mut self, display_name: &str) -> String {
        let key = normalize_key(display_name);
        match self.sections.get_mut(&key) {
            Some(section) => {
                section.display_name = display_name.to_string();
            }
            None => {
                self.sections.insert(
                    key.clone(),
                    SectionDocument {
                        display_name: display_name.to_string(),
                        content: String::new(),
                        local_version: 0,
                    },
                );
                self.order.push(key.clone());
            }
        }
        key
    }

    /// Replace a section's content from a local mutation.
    ///
    /// Creates the section if the key is unknown. Returns the new local
    /// version.
    pub fn set_content(&mut self, key: &str, content: &str) -> u64 {
        let section = self.entry(key);
        section.content = content.to_string();
        section.local_version += 1;
        section.local_version
    }

    /// Apply a remote edit. Never re-broadcasts and never bumps the
    /// local-mutation counter.
    pub fn merge_remote(&mut self, key: &str, content: &str) -> MergeOutcome {
        let focused = self.focused.as_deref() == Some(key);
        let section = self.entry(key);
        if section.content == content {
            return MergeOutcome::Unchanged;
        }
        section.content = content.to_string();
        if focused {
            if !self.deferred.iter().any(|k| k == key) {
                self.deferred.push(key.to_string());
            }
            MergeOutcome::Deferred
        } else {
            MergeOutcome::Applied
        }
    }

    /// Mark a section's control as focused by the local user.
    pub fn focus(&mut self, key: &str) {
        self.focused = Some(key.to_string());
    }

    /// Release focus. Returns the keys whose controls were updated remotely
    /// while focused and now need a refresh from the model.
    pub fn blur(&mut self) -> Vec<String> {
        self.focused = None;
        std::mem::take(&mut self.deferred)
    }

    pub fn is_focused(&self, key: &str) -> bool {
        self.focused.as_deref() == Some(key)
    }

    pub fn content(&self, key: &str) -> Option<&str> {
        self.sections.get(key).map(|s| s.content.as_str())
    }

    pub fn local_version(&self, key: &str) -> u64 {
        self.sections.get(key).map_or(0, |s| s.local_version)
    }

    /// Replace the section ordering. Unknown keys are dropped; tracked keys
    /// missing from the new order keep their relative position at the end.
    pub fn reorder(&mut self, keys: Vec<String>) {
        let mut order: Vec<String> = keys
            .into_iter()
            .filter(|k| self.sections.contains_key(k))
            .collect();
        for key in &self.order {
            if !order.contains(key) {
                order.push(key.clone());
            }
        }
        self.order = order;
    }

    /// Deterministic ordered snapshot for building a save request.
    pub fn snapshot(&self) -> Vec<SectionState> {
        self.order
            .iter()
            .filter_map(|key| {
                self.sections.get(key).map(|s| SectionState {
                    display_name: s.display_name.clone(),
                    key: key.clone(),
                    content: s.content.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn entry(&mut self, key: &str) -> &mut SectionDocument {
        if !self.sections.contains_key(key) {
            self.sections.insert(
                key.to_string(),
                SectionDocument {
                    display_name: key.to_string(),
                    content: String::new(),
                    local_version: 0,
                },
            );
            self.order.push(key.to_string());
        }
        self.sections.get_mut(key).expect("section just inserted")
    }
}
