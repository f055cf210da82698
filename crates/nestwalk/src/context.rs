//! Hierarchical execution context
//!
//! An [`ExecutionContext`] is created once per top-level apply call and
//! carried through the recursion. It keeps two distinct shapes:
//!
//! - the **execution stack**: contexts pushed while descending into a
//!   directory or container and popped on the way back up;
//! - the **information hierarchy**: every context ever pushed stays as a
//!   child of the context that was current at push time, so the values and
//!   associated information it collected can be read after the walk.
//!
//! Every push must be matched by exactly one pop before the traversal level
//! returns. [`ExecutionContext::within`] does the pairing on every exit path.

use crate::error::{EngineError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Claimant tag for values computed by the engine during the walk, as
/// opposed to values declared by an external manifest.
pub const CALCULATED_CLAIMANT: &str = "nestwalk:calculated";

/// One claimant's observations for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociatedInfo {
    pub claimant: String,
    pub path: String,
    pub properties: BTreeMap<String, String>,
}

type NodeId = usize;

#[derive(Debug)]
struct ContextNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    values: BTreeMap<String, String>,
    associated: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl ContextNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            values: BTreeMap::new(),
            associated: BTreeMap::new(),
        }
    }
}

/// Stack-shaped bookkeeping for one top-level apply call.
#[derive(Debug)]
pub struct ExecutionContext {
    nodes: Vec<ContextNode>,
    stack: Vec<NodeId>,
}

impl ExecutionContext {
    const ROOT: NodeId = 0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            nodes: vec![ContextNode::new(name.into(), None)],
            stack: Vec::new(),
        }
    }

    /// Name of the root context.
    pub fn name(&self) -> &str {
        &self.nodes[Self::ROOT].name
    }

    fn current(&self) -> NodeId {
        self.stack.last().copied().unwrap_or(Self::ROOT)
    }

    /// Name of the innermost pushed context, or the root's name.
    pub fn current_name(&self) -> &str {
        &self.nodes[self.current()].name
    }

    /// Number of contexts currently pushed.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Names on the execution stack, outermost first.
    pub fn stack_names(&self) -> Vec<&str> {
        self.stack.iter().map(|&id| self.nodes[id].name.as_str()).collect()
    }

    /// Push a child of the current context and make it current.
    pub fn push(&mut self, name: impl Into<String>) {
        let parent = self.current();
        let id = self.nodes.len();
        self.nodes.push(ContextNode::new(name.into(), Some(parent)));
        self.nodes[parent].children.push(id);
        self.stack.push(id);
    }

    /// Pop the current context. Popping an empty stack is an error.
    pub fn pop(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(_) => Ok(()),
            None => Err(EngineError::Context(format!(
                "pop on empty execution stack of context '{}'",
                self.name()
            ))),
        }
    }

    /// Run `f` inside a freshly pushed context, popping it on every exit path.
    ///
    /// If `f` left extra contexts pushed, they are unwound as well and the
    /// imbalance is reported (as an error when `f` itself succeeded).
    pub fn within<T>(
        &mut self,
        name: impl Into<String>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.push(name);
        let depth = self.stack.len();
        let result = f(self);

        let leaked = self.stack.len().saturating_sub(depth);
        if self.stack.len() < depth {
            // The body popped our frame; nothing left to pop for it.
            let err = EngineError::Context(format!(
                "context '{}' popped {} frame(s) it did not push",
                self.current_name(),
                depth - self.stack.len()
            ));
            warn!(error = %err, "Execution stack imbalance");
            return result.and(Err(err));
        }
        self.stack.truncate(depth - 1);

        if leaked > 0 {
            let err = EngineError::Context(format!(
                "{} context(s) left pushed inside '{}'",
                leaked,
                self.nodes[self.current()].name
            ));
            warn!(error = %err, "Execution stack imbalance");
            return result.and(Err(err));
        }
        result
    }

    /// Check that every push has been matched by a pop.
    pub fn verify_balanced(&self) -> Result<()> {
        if self.stack.is_empty() {
            return Ok(());
        }
        let names = self.stack_names().join("/");
        warn!(context = %self.name(), stack = %names, "Execution stack not empty after apply");
        Err(EngineError::Context(format!(
            "execution stack not empty: {}",
            names
        )))
    }

    /// Hierarchy-relative path of `entry` at the current level.
    ///
    /// Joins the names on the stack below the top-level structure, then the
    /// entry name, with `/`.
    pub fn entry_path(&self, entry: &str) -> String {
        let mut segments: Vec<&str> = self
            .stack
            .iter()
            .skip(1)
            .map(|&id| self.nodes[id].name.as_str())
            .collect();
        segments.push(entry);
        normalize_path(&segments.join("/"))
    }

    /// Record a key/value pair on the current context.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let id = self.current();
        self.nodes[id].values.insert(key.into(), value.into());
    }

    /// Look a key up on the current context, then its ancestors.
    pub fn get(&self, key: &str) -> Option<&str> {
        let mut id = Some(self.current());
        while let Some(node_id) = id {
            let node = &self.nodes[node_id];
            if let Some(value) = node.values.get(key) {
                return Some(value.as_str());
            }
            id = node.parent;
        }
        None
    }

    /// Values of the context reached by following child names from the root.
    pub fn values_at(&self, path: &[&str]) -> Option<&BTreeMap<String, String>> {
        let mut id = Self::ROOT;
        for segment in path {
            id = *self.nodes[id]
                .children
                .iter()
                .find(|&&child| self.nodes[child].name == *segment)?;
        }
        Some(&self.nodes[id].values)
    }

    /// Names of the child contexts of the current context, in push order.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.nodes[self.current()]
            .children
            .iter()
            .map(|&id| self.nodes[id].name.as_str())
    }

    /// Merge observed properties for `(claimant, path)` into the current
    /// context. Later values for the same property win.
    pub fn associate(
        &mut self,
        claimant: &str,
        path: &str,
        properties: impl IntoIterator<Item = (String, String)>,
    ) {
        let id = self.current();
        self.nodes[id]
            .associated
            .entry((claimant.to_string(), path.to_string()))
            .or_default()
            .extend(properties);
    }

    /// Every associated-information record in the whole hierarchy, sorted by
    /// claimant then path. Records for the same pair found in different
    /// contexts are merged.
    pub fn associated_information(&self) -> Vec<AssociatedInfo> {
        let mut merged: BTreeMap<(String, String), BTreeMap<String, String>> = BTreeMap::new();
        for node in &self.nodes {
            for (key, properties) in &node.associated {
                merged
                    .entry(key.clone())
                    .or_default()
                    .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
            .into_iter()
            .map(|((claimant, path), properties)| AssociatedInfo {
                claimant,
                path,
                properties,
            })
            .collect()
    }

    /// Associated information for one claimant.
    pub fn associated_for(&self, claimant: &str) -> Vec<AssociatedInfo> {
        self.associated_information()
            .into_iter()
            .filter(|info| info.claimant == claimant)
            .collect()
    }
}

/// Forward-slash path with empty and `.` segments removed.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
