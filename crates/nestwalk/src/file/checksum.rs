use super::{copy_or_drain, reported_path};
use crate::context::{ExecutionContext, CALCULATED_CLAIMANT};
use crate::digest::{DigestAlgorithm, DigestReader};
use crate::error::{EngineError, Result};
use crate::processor::{
    Capability, FileProcessor, Processor, ProcessorBase, ProcessorInit, StructureEntry,
};
use crate::structure::{DEFAULT_DIGESTS, DIGESTS_ATTRIBUTE};
use std::io::{Read, Write};
use tracing::debug;

/// Context value naming the last path this processor consumed.
pub const CHECKSUMMED_KEY: &str = "checksummed";

/// Reads an entry to its end, passing the bytes through to the output.
///
/// Inside a structure the enclosing traversal digests the bytes. A
/// standalone file is digested here and recorded under the calculated
/// claimant, so both cases end up with the same record.
#[derive(Debug, Default)]
pub struct Checksum {
    base: ProcessorBase,
    digests: Vec<DigestAlgorithm>,
}

impl Checksum {
    pub const IMPLEMENTATION: &'static str = "nestwalk.file.Checksum";
}

impl Processor for Checksum {
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
        let digests = self.base.attribute(DIGESTS_ATTRIBUTE).unwrap_or(DEFAULT_DIGESTS);
        self.digests = DigestAlgorithm::parse_list(digests)
            .map_err(|e| EngineError::Config(format!("{}: {}", self.base.alias, e)))?;
        Ok(())
    }
}

impl FileProcessor for Checksum {
    fn process(
        &self,
        _operation: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let path = reported_path(None, ctx);
        let mut reader = DigestReader::new(input, &self.digests);
        copy_or_drain(&mut reader, output)?;
        let summary = reader.finish()?;
        debug!(alias = %self.alias(), path = %path, bytes = summary.bytes, "Checksummed file");
        ctx.associate(CALCULATED_CLAIMANT, &path, summary.properties());
        ctx.set(CHECKSUMMED_KEY, path);
        Ok(())
    }

    fn process_entry(
        &self,
        _operation: &str,
        entry: &StructureEntry,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let bytes = copy_or_drain(input, output)?;
        debug!(alias = %self.alias(), path = %entry.path, bytes, "Checksummed entry");
        ctx.set(CHECKSUMMED_KEY, entry.path.as_str());
        Ok(())
    }

    fn produces_output(&self) -> bool {
        true
    }
}
