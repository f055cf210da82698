//! Container structure: ZIP archives.
//!
//! Archives are read through their central directory, so empty archives and
//! members written with data descriptors are walked like any other. A stream
//! input is spooled to an anonymous file in the temp directory first; nested
//! archives arrive as the extracted file itself.
//!
//! Members are visited in central-directory order and matched by their path
//! inside the archive. Records still use the hierarchy-relative path.
//!
//! With an output the archive is re-emitted: members handled by an
//! output-producing file action are replaced by what that action wrote,
//! every other member is copied. Compression, modification time and unix
//! mode are carried over per member.

use super::{EntryTraversal, TeeReader, TraversalSettings};
use crate::context::{normalize_path, ExecutionContext};
use crate::error::Result;
use crate::manager::ProcessorManager;
use crate::processor::{
    Action, Capability, ContainerStructureProcessor, Processor, ProcessorBase, ProcessorInit,
    StructureEntry,
};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, Write};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Default)]
pub struct ZipProcessor {
    base: ProcessorBase,
    settings: TraversalSettings,
}

impl ZipProcessor {
    pub const IMPLEMENTATION: &'static str = "nestwalk.structure.ZipProcessor";

    fn spool(&self, manager: &ProcessorManager, input: &mut dyn Read) -> Result<File> {
        let dir = self
            .settings
            .temp_dir
            .clone()
            .unwrap_or_else(|| manager.temp_dir());
        let mut spooled = tempfile::tempfile_in(&dir)?;
        let bytes = io::copy(input, &mut spooled)?;
        spooled.rewind()?;
        debug!(alias = %self.alias(), bytes, dir = %dir.display(), "Spooled archive stream");
        Ok(spooled)
    }

    fn walk_archive(
        &self,
        manager: &ProcessorManager,
        name: &str,
        file: File,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let traversal = EntryTraversal {
            manager,
            owner_alias: self.alias(),
            settings: &self.settings,
        };
        ctx.within(name, |ctx| {
            let mut archive = ZipArchive::new(BufReader::new(file))?;
            match output {
                Some(output) => self.rewrite_members(&traversal, &mut archive, output, ctx),
                None => self.read_members(&traversal, &mut archive, ctx),
            }
        })
    }

    fn read_members<R: Read + Seek>(
        &self,
        traversal: &EntryTraversal<'_>,
        archive: &mut ZipArchive<R>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        for index in 0..archive.len() {
            let mut member = archive.by_index(index)?;
            if member.is_dir() {
                continue;
            }
            let member_name = member.name().to_string();
            let Some(action) = Action::first_match(self.actions(), &normalize_path(&member_name))
            else {
                debug!(member = %member_name, "No action matches, skipping");
                continue;
            };
            let entry = StructureEntry::new(
                member_name.as_str(),
                ctx.entry_path(&member_name),
                Some(member.size()),
            );
            traversal.handle(action, &entry, &mut member, None, ctx)?;
        }
        debug!(alias = %self.alias(), members = archive.len(), "Archive read");
        Ok(())
    }

    fn rewrite_members<R: Read + Seek>(
        &self,
        traversal: &EntryTraversal<'_>,
        archive: &mut ZipArchive<R>,
        output: &mut dyn Write,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut replaced = 0usize;

        for index in 0..archive.len() {
            let mut member = archive.by_index(index)?;
            let member_name = member.name().to_string();

            let mut options = SimpleFileOptions::default()
                .compression_method(writable_compression(member.compression()));
            if let Some(modified) = member.last_modified() {
                options = options.last_modified_time(modified);
            }
            if let Some(mode) = member.unix_mode() {
                options = options.unix_permissions(mode);
            }

            if member.is_dir() {
                writer.add_directory(member_name.as_str(), options)?;
                continue;
            }

            let size = member.size();
            let action = Action::first_match(self.actions(), &normalize_path(&member_name));
            let mut tee = TeeReader::new(&mut member);
            let mut replacement = Vec::new();
            let produced = match action {
                Some(action) => {
                    let entry = StructureEntry::new(
                        member_name.as_str(),
                        ctx.entry_path(&member_name),
                        Some(size),
                    );
                    traversal.handle(action, &entry, &mut tee, Some(&mut replacement), ctx)?
                }
                None => false,
            };
            let original = tee.finish()?;

            writer.start_file(member_name.as_str(), options)?;
            if produced {
                replaced += 1;
                writer.write_all(&replacement)?;
            } else {
                writer.write_all(&original)?;
            }
        }

        let rewritten = writer.finish()?.into_inner();
        output.write_all(&rewritten)?;
        output.flush()?;
        debug!(alias = %self.alias(), replaced, bytes = rewritten.len(), "Archive rewritten");
        Ok(())
    }
}

/// Only stored and deflated members can be written back; others are deflated.
fn writable_compression(method: CompressionMethod) -> CompressionMethod {
    match method {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    }
}

impl Processor for ZipProcessor {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn capability(&self) -> Capability<'_> {
        Capability::Container(self)
    }

    fn initialize(&mut self, init: ProcessorInit) -> Result<()> {
        self.base.apply_init(init);
        self.settings = TraversalSettings::from_base(&self.base)?;
        Ok(())
    }
}

impl ContainerStructureProcessor for ZipProcessor {
    fn process(
        &self,
        manager: &ProcessorManager,
        operation: &str,
        name: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        info!(
            alias = %self.alias(),
            operation,
            name,
            rewrite = output.is_some(),
            "Reading archive"
        );
        let spooled = self.spool(manager, input)?;
        self.walk_archive(manager, name, spooled, output, ctx)
    }

    fn process_file(
        &self,
        manager: &ProcessorManager,
        operation: &str,
        name: &str,
        file: File,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        debug!(alias = %self.alias(), operation, name, "Reading extracted archive");
        self.walk_archive(manager, name, file, None, ctx)
    }
}
