use super::copy_or_drain;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::processor::{
    Capability, FileProcessor, Processor, ProcessorBase, ProcessorInit, StructureEntry,
};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const TARGET_ATTRIBUTE: &str = "target";
pub const EXTRACTED_TO_PROPERTY: &str = "extracted-to";

/// Writes each matched entry below `target`, at its hierarchy-relative path.
#[derive(Debug, Default)]
pub struct Extract {
    base: ProcessorBase,
    target: PathBuf,
}

impl Extract {
    pub const IMPLEMENTATION: &'static str = "nestwalk.file.Extract";

    /// Destination of `relative` below the target directory. Anything that
    /// could escape it (`..`, an absolute path, a drive prefix) is refused.
    fn destination(&self, operation: &str, relative: &str) -> Result<PathBuf> {
        let mut destination = self.target.clone();
        let mut segments = 0usize;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(segment) => {
                    destination.push(segment);
                    segments += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(self.base.error(
                        operation,
                        format!(
                            "refusing to extract '{}' outside of the target directory",
                            relative
                        ),
                    ));
                }
            }
        }
        if segments == 0 {
            return Err(self.base.error(operation, format!("empty entry path '{}'", relative)));
        }
        Ok(destination)
    }
}

impl Processor for Extract {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn capability(&self) -> Capability<'_> {
        Capability::File(self)
    }

    fn initialize(&mut self, init: ProcessorInit) -> Result<()> {
        self.base.apply_init(init);
        self.target = match self.base.attribute(TARGET_ATTRIBUTE).map(str::trim) {
            Some(target) if !target.is_empty() => PathBuf::from(target),
            _ => {
                return Err(EngineError::Config(format!(
                    "{}: attribute '{}' is required",
                    self.base.alias, TARGET_ATTRIBUTE
                )))
            }
        };
        Ok(())
    }
}

impl FileProcessor for Extract {
    fn process(
        &self,
        operation: &str,
        _input: &mut dyn Read,
        _output: Option<&mut dyn Write>,
        _ctx: &mut ExecutionContext,
    ) -> Result<()> {
        Err(self
            .base
            .error(operation, "extraction needs an entry of an enclosing structure"))
    }

    fn process_entry(
        &self,
        operation: &str,
        entry: &StructureEntry,
        input: &mut dyn Read,
        _output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let destination = self.destination(operation, &entry.path)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&destination)?);
        let bytes = copy_or_drain(input, Some(&mut writer))?;
        debug!(
            alias = %self.alias(),
            path = %entry.path,
            destination = %destination.display(),
            bytes,
            "Extracted entry"
        );

        ctx.associate(
            self.alias(),
            &entry.path,
            [(
                EXTRACTED_TO_PROPERTY.to_string(),
                destination.display().to_string(),
            )],
        );
        Ok(())
    }
}
