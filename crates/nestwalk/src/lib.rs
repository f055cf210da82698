//! nestwalk - configurable traversal of nested containers
//!
//! A pipeline is a tree of processor declarations. Structure processors
//! (a directory walker, a ZIP reader) enumerate their members and hand each
//! one to the first nested action whose selection matches the member's
//! hierarchy-relative path. Matched containers are extracted to a scoped
//! temporary file and walked recursively; matched files are passed to file
//! processors. Size and digests of every processed member are collected as
//! associated information in the [`ExecutionContext`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use nestwalk::{
//!     ExecutionContext, PipelineConfig, ProcessorManager, ProcessorRegistry, Properties,
//! };
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::load("fixity.toml".as_ref())?;
//! let mut manager = ProcessorManager::new(
//!     Arc::new(ProcessorRegistry::with_builtins()),
//!     Properties::new(),
//!     config.pipeline,
//! );
//! manager.prepare()?;
//!
//! let mut ctx = ExecutionContext::new("archive");
//! manager.apply_path("archive", "/data/archive".as_ref(), &mut ctx)?;
//! ctx.verify_balanced()?;
//! for record in ctx.associated_information() {
//!     println!("{} {:?}", record.path, record.properties);
//! }
//! ```

pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod file;
pub mod manager;
pub mod processor;
pub mod registry;
pub mod structure;

pub use config::{ConfigNode, PipelineConfig, Properties, ResolutionMode};
pub use context::{AssociatedInfo, ExecutionContext, CALCULATED_CLAIMANT};
pub use digest::{DigestAlgorithm, DigestReader, DigestSummary, DigestValue};
pub use error::{EngineError, ProcessorError, Result};
pub use manager::{classify, ManagerOptions, NodeKind, ProcessorDeclaration, ProcessorManager};
pub use processor::{
    Action, Capability, CapabilityKind, ContainerStructureProcessor, DispersedStructureProcessor,
    EntrySelection, FileProcessor, Lineage, Processor, ProcessorBase, ProcessorInit, ProcessorRef,
    StructureEntry, DEFAULT_OPERATION,
};
pub use registry::ProcessorRegistry;
