//! Processor model
//!
//! A [`Processor`] is the unit of configured behavior. It is built once by
//! the registry, initialized from its configuration node, and then shared
//! (behind an `Arc`) by every apply call of the compiled pipeline.
//!
//! # Sharing contract
//!
//! Processors are **not** cloned per invocation. Implementations must keep
//! every piece of per-call state in the [`ExecutionContext`] or on the
//! stack; a processor holding mutable fields breaks concurrent use of one
//! compiled pipeline from several threads.
//!
//! # Capabilities
//!
//! Each processor advertises exactly one capability through
//! [`Processor::capability`]:
//!
//! - [`ContainerStructureProcessor`]: a structure held in one byte stream
//!   (an archive);
//! - [`DispersedStructureProcessor`]: a structure spread over a filesystem
//!   hierarchy;
//! - [`FileProcessor`]: the bytes of one opaque file.

pub mod action;
pub mod lineage;
pub mod selection;

use crate::config::ConfigNode;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::manager::ProcessorManager;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub use action::Action;
pub use lineage::{Lineage, ProcessorRef};
pub use selection::EntrySelection;

/// Operation invoked when a declaration does not name another one.
pub const DEFAULT_OPERATION: &str = "process";

/// Everything a processor learns from its configuration node.
#[derive(Debug, Clone, Default)]
pub struct ProcessorInit {
    pub implementation: String,
    pub alias: String,
    /// Attributes with placeholders already resolved.
    pub attributes: BTreeMap<String, String>,
    /// Text content with placeholders already resolved.
    pub text: Option<String>,
    /// Enclosing processors, outermost first.
    pub lineage: Lineage,
}

/// State every processor carries; implementations embed one and expose it
/// through [`Processor::base`].
#[derive(Debug, Default)]
pub struct ProcessorBase {
    pub implementation: String,
    pub alias: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub lineage: Lineage,
    pub actions: Vec<Action>,
    pub configuration: Option<ConfigNode>,
}

impl ProcessorBase {
    pub fn apply_init(&mut self, init: ProcessorInit) {
        self.implementation = init.implementation;
        self.alias = init.alias;
        self.attributes = init.attributes;
        self.text = init.text;
        self.lineage = init.lineage;
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Boolean attribute; accepts `true`/`false`/`yes`/`no`/`1`/`0`.
    pub fn bool_attribute(&self, key: &str, default: bool) -> Result<bool> {
        match self.attribute(key) {
            None => Ok(default),
            Some(value) => parse_bool(value).ok_or_else(|| {
                EngineError::Config(format!(
                    "{}: attribute '{}' must be a boolean, got '{}'",
                    self.alias, key, value
                ))
            }),
        }
    }

    /// Error for this processor and `operation`.
    pub fn error(&self, operation: &str, message: impl Into<String>) -> EngineError {
        EngineError::Processor(crate::error::ProcessorError::new(
            self.alias.clone(),
            operation,
            message,
        ))
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Which structural capability a processor offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Container,
    Dispersed,
    File,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Container => f.write_str("container-structure"),
            CapabilityKind::Dispersed => f.write_str("dispersed-structure"),
            CapabilityKind::File => f.write_str("file"),
        }
    }
}

/// Capability view of a processor, used for dispatch.
pub enum Capability<'a> {
    Container(&'a dyn ContainerStructureProcessor),
    Dispersed(&'a dyn DispersedStructureProcessor),
    File(&'a dyn FileProcessor),
}

impl Capability<'_> {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Container(_) => CapabilityKind::Container,
            Capability::Dispersed(_) => CapabilityKind::Dispersed,
            Capability::File(_) => CapabilityKind::File,
        }
    }

    /// Whether the processor can consume a byte stream.
    pub fn is_stream_capable(&self) -> bool {
        !matches!(self, Capability::Dispersed(_))
    }
}

/// Common surface of every processor.
pub trait Processor: Send + Sync {
    fn base(&self) -> &ProcessorBase;

    fn base_mut(&mut self) -> &mut ProcessorBase;

    fn capability(&self) -> Capability<'_>;

    /// Delayed construction, called once after the registry built the
    /// processor. Implementations that validate attributes override this
    /// and call [`ProcessorBase::apply_init`] first.
    fn initialize(&mut self, init: ProcessorInit) -> Result<()> {
        self.base_mut().apply_init(init);
        Ok(())
    }

    /// Install the nested actions compiled from child declarations.
    fn define(&mut self, actions: Vec<Action>) {
        self.base_mut().actions = actions;
    }

    fn actions(&self) -> &[Action] {
        &self.base().actions
    }

    /// Hand over the whole configuration node when its children are not
    /// processor declarations.
    fn set_configuration(&mut self, node: ConfigNode) -> Result<()> {
        self.base_mut().configuration = Some(node);
        Ok(())
    }

    fn configuration(&self) -> Option<&ConfigNode> {
        self.base().configuration.as_ref()
    }

    fn alias(&self) -> &str {
        &self.base().alias
    }

    fn implementation(&self) -> &str {
        &self.base().implementation
    }

    fn lineage(&self) -> &Lineage {
        &self.base().lineage
    }

    fn supports(&self, operation: &str) -> bool {
        operation == DEFAULT_OPERATION
    }
}

/// Identity of one member of an enclosing structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureEntry {
    /// Member name within its immediate structure.
    pub name: String,
    /// Hierarchy-relative path, `/` separated.
    pub path: String,
    /// Declared size, when the structure records one.
    pub size: Option<u64>,
}

impl StructureEntry {
    pub fn new(name: impl Into<String>, path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
        }
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Structure fully contained in one byte stream.
pub trait ContainerStructureProcessor: Processor {
    /// Walk the structure read from `input`. With `output`, emit an
    /// equivalent (possibly mutated) structure; without it, read only.
    fn process(
        &self,
        manager: &ProcessorManager,
        operation: &str,
        name: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()>;

    /// Read-only walk of a structure already held in a local file, as
    /// handed over for nested containers. Reads the file as a stream unless
    /// overridden.
    fn process_file(
        &self,
        manager: &ProcessorManager,
        operation: &str,
        name: &str,
        file: File,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let mut file = file;
        self.process(manager, operation, name, &mut file, None, ctx)
    }
}

/// Structure spread over a filesystem hierarchy. Read only.
pub trait DispersedStructureProcessor: Processor {
    fn process(
        &self,
        manager: &ProcessorManager,
        operation: &str,
        name: &str,
        root: &Path,
        ctx: &mut ExecutionContext,
    ) -> Result<()>;
}

/// Bytes of one opaque file.
pub trait FileProcessor: Processor {
    fn process(
        &self,
        operation: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()>;

    /// Entry-scoped variant used while a structure is being traversed.
    fn process_entry(
        &self,
        operation: &str,
        entry: &StructureEntry,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let _ = entry;
        self.process(operation, input, output, ctx)
    }

    /// Whether this processor writes replacement bytes when given an output.
    fn produces_output(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_bool_attribute_reports_alias() {
        let mut base = ProcessorBase::default();
        base.alias = "validator".to_string();
        base.attributes.insert("strict".to_string(), "sometimes".to_string());
        assert!(base.bool_attribute("missing", true).unwrap());
        let err = base.bool_attribute("strict", false).unwrap_err();
        assert!(err.to_string().contains("validator"));
    }

    #[test]
    fn test_entry_file_name() {
        let entry = StructureEntry::new("docs/a.txt", "x.zip/docs/a.txt", Some(3));
        assert_eq!(entry.file_name(), "a.txt");
    }
}
