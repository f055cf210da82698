//! Pipeline compiler and dispatcher
//!
//! [`ProcessorManager::prepare`] turns the configuration tree into a tree of
//! processors, each holding its ordered [`Action`]s. The apply methods then
//! route a named input to the first top-level action able to take it.
//!
//! # Configuration branches
//!
//! The children of a processor declaration are either all processor
//! declarations (each becomes an [`Action`]) or the whole node is handed to
//! the processor as opaque configuration. One non-declaration child is
//! enough to switch a node to the second branch; children are classified
//! before any of them is compiled.

use crate::config::{ConfigNode, Properties, ResolutionMode};
use crate::context::ExecutionContext;
use crate::error::{EngineError, ProcessorError, Result};
use crate::processor::{
    Action, Capability, CapabilityKind, EntrySelection, Lineage, Processor, ProcessorInit,
    ProcessorRef, StructureEntry, DEFAULT_OPERATION,
};
use crate::registry::ProcessorRegistry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace scheme marking a processor declaration.
pub const PROCESSOR_SCHEME: &str = "processor:";

/// Alias used in errors raised before any processor was selected.
const PIPELINE_ALIAS: &str = "pipeline";

/// Implementation and alias parsed from `processor:<implementation>[#<alias>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDeclaration {
    pub implementation: String,
    pub alias: String,
}

impl ProcessorDeclaration {
    /// Parse the part after the scheme.
    pub fn parse(spec: &str) -> Result<Self> {
        let (implementation, alias) = match spec.split_once('#') {
            Some((implementation, alias)) => (implementation.trim(), alias.trim()),
            None => (spec.trim(), ""),
        };
        if implementation.is_empty() {
            return Err(EngineError::Config(format!(
                "processor declaration '{}{}' names no implementation",
                PROCESSOR_SCHEME, spec
            )));
        }
        let alias = if alias.is_empty() {
            implementation.rsplit('.').next().unwrap_or(implementation)
        } else {
            alias
        };
        Ok(Self {
            implementation: implementation.to_string(),
            alias: alias.to_string(),
        })
    }
}

/// Outcome of inspecting a configuration node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Processor(ProcessorDeclaration),
    NotAProcessor,
}

/// Decide whether `node` declares a processor.
pub fn classify(node: &ConfigNode) -> Result<NodeKind> {
    match node
        .namespace
        .as_deref()
        .and_then(|ns| ns.trim().strip_prefix(PROCESSOR_SCHEME))
    {
        Some(spec) => ProcessorDeclaration::parse(spec).map(NodeKind::Processor),
        None => Ok(NodeKind::NotAProcessor),
    }
}

fn operation_name(node: &ConfigNode) -> &str {
    let name = node.name.trim();
    if name.is_empty() {
        DEFAULT_OPERATION
    } else {
        name
    }
}

/// Tunables of a [`ProcessorManager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Placeholder resolution used for attributes and text.
    pub resolution: ResolutionMode,
    /// Directory for extracted nested containers; the system temp dir if unset.
    pub temp_dir: Option<PathBuf>,
}

/// Compiles a configuration tree and applies it to inputs.
///
/// A prepared manager is immutable and may be shared across threads; each
/// apply call needs its own [`ExecutionContext`].
pub struct ProcessorManager {
    registry: Arc<ProcessorRegistry>,
    properties: Properties,
    configuration: ConfigNode,
    options: ManagerOptions,
    actions: Option<Vec<Action>>,
}

impl ProcessorManager {
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        properties: Properties,
        configuration: ConfigNode,
    ) -> Self {
        Self {
            registry,
            properties,
            configuration,
            options: ManagerOptions::default(),
            actions: None,
        }
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Directory for scratch files of nested extraction.
    pub fn temp_dir(&self) -> PathBuf {
        self.options
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Substitute `${name}` placeholders using the configured mode.
    pub fn resolve(&self, text: &str) -> String {
        self.options.resolution.resolve(text, &self.properties)
    }

    pub fn is_prepared(&self) -> bool {
        self.actions.is_some()
    }

    /// Top-level actions, in declaration order.
    pub fn actions(&self) -> Result<&[Action]> {
        self.actions.as_deref().ok_or(EngineError::NotPrepared)
    }

    /// Compile the configuration. Any failure leaves the manager unprepared.
    pub fn prepare(&mut self) -> Result<()> {
        let actions = self.compile_root()?;
        info!(actions = actions.len(), "Pipeline prepared");
        self.actions = Some(actions);
        Ok(())
    }

    fn compile_root(&self) -> Result<Vec<Action>> {
        let root = &self.configuration;
        let mut actions = Vec::with_capacity(root.children.len());
        for child in &root.children {
            match classify(child)? {
                NodeKind::Processor(declaration) => {
                    let operation = operation_name(child);
                    let processor = self.compile_processor(child, declaration, &Lineage::new())?;
                    actions.push(Action::new(EntrySelection::any(operation), processor, operation));
                }
                NodeKind::NotAProcessor => {
                    return Err(EngineError::Config(format!(
                        "top-level node '{}' is not a processor declaration",
                        child.name
                    )));
                }
            }
        }
        if actions.is_empty() {
            return Err(EngineError::Config(format!(
                "configuration root '{}' declares no processors",
                root.name
            )));
        }
        Ok(actions)
    }

    fn resolve_attributes(&self, node: &ConfigNode) -> BTreeMap<String, String> {
        node.attributes
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve(value)))
            .collect()
    }

    fn compile_processor(
        &self,
        node: &ConfigNode,
        declaration: ProcessorDeclaration,
        lineage: &Lineage,
    ) -> Result<Arc<dyn Processor>> {
        let mut processor = self.registry.instantiate(&declaration.implementation)?;
        processor.initialize(ProcessorInit {
            implementation: declaration.implementation.clone(),
            alias: declaration.alias.clone(),
            attributes: self.resolve_attributes(node),
            text: node.text.as_deref().map(|text| self.resolve(text)),
            lineage: lineage.clone(),
        })?;

        let inner = lineage.push(ProcessorRef::new(
            declaration.implementation,
            declaration.alias.clone(),
        ));

        let declarations: Option<Vec<ProcessorDeclaration>> = node
            .children
            .iter()
            .map(classify)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|kind| match kind {
                NodeKind::Processor(declaration) => Some(declaration),
                NodeKind::NotAProcessor => None,
            })
            .collect();

        match declarations {
            Some(declarations) => {
                let mut actions = Vec::with_capacity(declarations.len());
                for (child, child_declaration) in node.children.iter().zip(declarations) {
                    let operation = operation_name(child);
                    let attributes = self.resolve_attributes(child);
                    let selection = EntrySelection::from_attributes(&attributes, operation)?;
                    let child_processor = self.compile_processor(child, child_declaration, &inner)?;
                    actions.push(Action::new(selection, child_processor, operation));
                }
                debug!(
                    alias = %declaration.alias,
                    actions = actions.len(),
                    "Defined nested actions"
                );
                processor.define(actions);
            }
            None => {
                debug!(alias = %declaration.alias, "Children are configuration, not actions");
                processor.set_configuration(node.clone())?;
            }
        }

        Ok(Arc::from(processor))
    }

    /// Apply the pipeline to a stream-contained structure or file.
    ///
    /// Routes to the first top-level action whose processor accepts a
    /// stream; dispersed-only actions are skipped.
    pub fn apply(
        &self,
        name: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let action = self
            .actions()?
            .iter()
            .find(|action| action.processor().capability().is_stream_capable())
            .ok_or_else(|| {
                EngineError::Processor(ProcessorError::new(
                    PIPELINE_ALIAS,
                    DEFAULT_OPERATION,
                    format!("no stream-capable processor configured for '{}'", name),
                ))
            })?;

        info!(name = %name, alias = %action.alias(), "Applying pipeline to stream");
        match action.processor().capability() {
            Capability::File(_) => self.apply_file(action, input, output, ctx),
            _ => self.apply_container(action, name, input, output, ctx),
        }
    }

    /// Apply the pipeline to a filesystem root.
    ///
    /// Only dispersed-structure processors take a filesystem root.
    pub fn apply_path(&self, name: &str, root: &Path, ctx: &mut ExecutionContext) -> Result<()> {
        let actions = self.actions()?;
        match actions
            .iter()
            .find(|action| action.processor().capability().kind() == CapabilityKind::Dispersed)
        {
            Some(action) => {
                info!(
                    name = %name,
                    root = %root.display(),
                    alias = %action.alias(),
                    "Applying pipeline to filesystem root"
                );
                self.apply_dispersed(action, name, root, ctx)
            }
            None => {
                let (alias, operation) = actions
                    .first()
                    .map(|action| (action.alias(), action.operation()))
                    .unwrap_or((PIPELINE_ALIAS, DEFAULT_OPERATION));
                Err(EngineError::Processor(ProcessorError::new(
                    alias,
                    operation,
                    "not currently supported: stream processors cannot take a filesystem root",
                )))
            }
        }
    }

    /// Run a container-structure action on `input`.
    pub fn apply_container(
        &self,
        action: &Action,
        name: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        check_operation(action)?;
        match action.processor().capability() {
            Capability::Container(container) => {
                debug!(alias = %action.alias(), name = %name, "Processing container");
                container.process(self, action.operation(), name, input, output, ctx)
            }
            other => Err(capability_mismatch(action, CapabilityKind::Container, other.kind())),
        }
    }

    /// Run a container-structure action, read only, on a structure already
    /// held in a local file.
    pub fn apply_container_file(
        &self,
        action: &Action,
        name: &str,
        file: File,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        check_operation(action)?;
        match action.processor().capability() {
            Capability::Container(container) => {
                debug!(alias = %action.alias(), name = %name, "Processing extracted container");
                container.process_file(self, action.operation(), name, file, ctx)
            }
            other => Err(capability_mismatch(action, CapabilityKind::Container, other.kind())),
        }
    }

    /// Run a dispersed-structure action on the tree below `root`.
    pub fn apply_dispersed(
        &self,
        action: &Action,
        name: &str,
        root: &Path,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        check_operation(action)?;
        match action.processor().capability() {
            Capability::Dispersed(dispersed) => {
                debug!(alias = %action.alias(), name = %name, "Processing dispersed structure");
                dispersed.process(self, action.operation(), name, root, ctx)
            }
            other => Err(capability_mismatch(action, CapabilityKind::Dispersed, other.kind())),
        }
    }

    /// Run a file action on a standalone input.
    pub fn apply_file(
        &self,
        action: &Action,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        check_operation(action)?;
        match action.processor().capability() {
            Capability::File(file) => {
                wrap_failure(action, file.process(action.operation(), input, output, ctx))
            }
            other => Err(capability_mismatch(action, CapabilityKind::File, other.kind())),
        }
    }

    /// Invoke a file action on one member of an enclosing structure.
    ///
    /// Failures come back as [`ProcessorError`]s naming `alias:operation`;
    /// a failure that already is one passes through unchanged.
    pub fn dispatch_to_entry(
        &self,
        action: &Action,
        entry: &StructureEntry,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        check_operation(action)?;
        match action.processor().capability() {
            Capability::File(file) => {
                debug!(alias = %action.alias(), path = %entry.path, "Dispatching entry");
                wrap_failure(
                    action,
                    file.process_entry(action.operation(), entry, input, output, ctx),
                )
            }
            other => Err(capability_mismatch(action, CapabilityKind::File, other.kind())),
        }
    }
}

fn check_operation(action: &Action) -> Result<()> {
    if action.processor().supports(action.operation()) {
        Ok(())
    } else {
        Err(EngineError::Processor(ProcessorError::new(
            action.alias(),
            action.operation(),
            "unsupported operation",
        )))
    }
}

fn capability_mismatch(
    action: &Action,
    expected: CapabilityKind,
    actual: CapabilityKind,
) -> EngineError {
    EngineError::Processor(ProcessorError::new(
        action.alias(),
        action.operation(),
        format!("{} processor used where a {} processor is required", actual, expected),
    ))
}

fn wrap_failure(action: &Action, result: Result<()>) -> Result<()> {
    result.map_err(|err| match err {
        EngineError::Processor(_) => err,
        other => EngineError::Processor(ProcessorError::new(
            action.alias(),
            action.operation(),
            other.root_message(),
        )),
    })
}
