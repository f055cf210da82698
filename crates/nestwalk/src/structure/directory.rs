//! Dispersed structure: a directory tree on the filesystem.

use super::{EntryTraversal, TraversalSettings};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::manager::ProcessorManager;
use crate::processor::{
    Action, Capability, DispersedStructureProcessor, Processor, ProcessorBase, ProcessorInit,
    StructureEntry,
};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const FOLLOW_SYMLINKS_ATTRIBUTE: &str = "follow-symlinks";

/// Walks a directory tree, one execution context per directory level.
///
/// Children are visited in file-name order. Directories are descended into
/// before the entries that follow them, so the walk is deterministic.
#[derive(Debug, Default)]
pub struct DirectoryWalker {
    base: ProcessorBase,
    settings: TraversalSettings,
    follow_symlinks: bool,
}

impl DirectoryWalker {
    pub const IMPLEMENTATION: &'static str = "nestwalk.structure.DirectoryWalker";

    fn walk_level(
        &self,
        traversal: &EntryTraversal<'_>,
        dir: &Path,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                ctx.within(file_name, |ctx| self.walk_level(traversal, entry.path(), ctx))?;
                continue;
            }
            if !file_type.is_file() {
                debug!(path = %entry.path().display(), "Skipping non-regular file");
                continue;
            }

            let path = ctx.entry_path(&file_name);
            let Some(action) = Action::first_match(self.actions(), &path) else {
                debug!(path = %path, "No action matches, skipping");
                continue;
            };

            let size = entry.metadata().ok().map(|meta| meta.len());
            let mut file = File::open(entry.path())?;
            traversal.handle(
                action,
                &StructureEntry::new(file_name, path, size),
                &mut file,
                None,
                ctx,
            )?;
        }
        Ok(())
    }
}

impl Processor for DirectoryWalker {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn capability(&self) -> Capability<'_> {
        Capability::Dispersed(self)
    }

    fn initialize(&mut self, init: ProcessorInit) -> Result<()> {
        self.base.apply_init(init);
        self.settings = TraversalSettings::from_base(&self.base)?;
        self.follow_symlinks = self.base.bool_attribute(FOLLOW_SYMLINKS_ATTRIBUTE, false)?;
        Ok(())
    }
}

impl DispersedStructureProcessor for DirectoryWalker {
    fn process(
        &self,
        manager: &ProcessorManager,
        operation: &str,
        name: &str,
        root: &Path,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        if !root.is_dir() {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", root.display()),
            )));
        }
        info!(alias = %self.alias(), operation, root = %root.display(), "Walking directory tree");

        let traversal = EntryTraversal {
            manager,
            owner_alias: self.alias(),
            settings: &self.settings,
        };
        ctx.within(name, |ctx| self.walk_level(&traversal, root, ctx))
    }
}
