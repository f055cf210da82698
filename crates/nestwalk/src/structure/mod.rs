//! Structure processors and the per-entry traversal they share.
//!
//! For every member of a structure the owning processor picks the first
//! action whose selection matches the member's hierarchy-relative path and
//! hands the member to [`EntryTraversal::handle`], which
//!
//! 1. wraps the member's bytes in a [`DigestReader`];
//! 2. extracts nested containers to a scoped temporary file and recurses
//!    through the manager, or dispatches file actions directly;
//! 3. records size and digests as associated information under the
//!    [`CALCULATED_CLAIMANT`] claimant.

pub mod archive;
pub mod directory;

use crate::context::{ExecutionContext, CALCULATED_CLAIMANT};
use crate::digest::{DigestAlgorithm, DigestReader};
use crate::error::{EngineError, ProcessorError, Result};
use crate::manager::ProcessorManager;
use crate::processor::{Action, Capability, ProcessorBase, StructureEntry};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

pub use archive::ZipProcessor;
pub use directory::DirectoryWalker;

pub const DIGESTS_ATTRIBUTE: &str = "digests";
pub const TEMP_DIR_ATTRIBUTE: &str = "temp-dir";
pub const DEFAULT_DIGESTS: &str = "md5,sha-256";

/// Traversal options read from a structure processor's attributes.
#[derive(Debug, Clone)]
pub struct TraversalSettings {
    pub digests: Vec<DigestAlgorithm>,
    pub temp_dir: Option<PathBuf>,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            digests: vec![DigestAlgorithm::Md5, DigestAlgorithm::Sha256],
            temp_dir: None,
        }
    }
}

impl TraversalSettings {
    pub fn from_base(base: &ProcessorBase) -> Result<Self> {
        let digests = base.attribute(DIGESTS_ATTRIBUTE).unwrap_or(DEFAULT_DIGESTS);
        let digests = DigestAlgorithm::parse_list(digests)
            .map_err(|e| EngineError::Config(format!("{}: {}", base.alias, e)))?;
        let temp_dir = base
            .attribute(TEMP_DIR_ATTRIBUTE)
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        Ok(Self { digests, temp_dir })
    }
}

/// Per-call view shared by the members of one structure level.
pub(crate) struct EntryTraversal<'a> {
    pub manager: &'a ProcessorManager,
    pub owner_alias: &'a str,
    pub settings: &'a TraversalSettings,
}

impl EntryTraversal<'_> {
    /// Process one matched member. Returns whether `output` received
    /// replacement bytes.
    pub fn handle(
        &self,
        action: &Action,
        entry: &StructureEntry,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<bool> {
        let mut reader = DigestReader::new(input, &self.settings.digests);

        let produced_output = match action.processor().capability() {
            Capability::Container(_) => {
                self.extract_and_recurse(action, entry, &mut reader, ctx)?;
                false
            }
            Capability::File(file) => {
                let produces = output.is_some() && file.produces_output();
                self.manager
                    .dispatch_to_entry(action, entry, &mut reader, output, ctx)?;
                reader.drain()?;
                produces
            }
            Capability::Dispersed(_) => {
                return Err(EngineError::Processor(ProcessorError::new(
                    action.alias(),
                    action.operation(),
                    format!(
                        "dispersed-structure processor cannot process member '{}'",
                        entry.path
                    ),
                )));
            }
        };

        if reader.bytes_read() > 0 {
            let summary = reader.finish()?;
            ctx.associate(CALCULATED_CLAIMANT, &entry.path, summary.properties());
        }
        Ok(produced_output)
    }

    fn extract_and_recurse(
        &self,
        action: &Action,
        entry: &StructureEntry,
        reader: &mut dyn Read,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let temp_dir = self
            .settings
            .temp_dir
            .clone()
            .unwrap_or_else(|| self.manager.temp_dir());
        let prefix = format!(
            "{}-{}-",
            sanitize_name(self.owner_alias),
            sanitize_name(action.alias())
        );

        // Dropping the handle deletes the file, on every path out of here.
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".extract")
            .tempfile_in(&temp_dir)?;

        let copied = io::copy(reader, temp.as_file_mut()).and_then(|n| {
            temp.as_file_mut().flush()?;
            Ok(n)
        });
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    path = %entry.path,
                    temp = %temp.path().display(),
                    error = %err,
                    "Failed to extract nested container"
                );
                return Err(err.into());
            }
        };
        debug!(
            path = %entry.path,
            bytes,
            temp = %temp.path().display(),
            "Extracted nested container"
        );

        let extracted = temp.reopen()?;
        self.manager
            .apply_container_file(action, &entry.name, extracted, ctx)?;
        temp.close()?;
        Ok(())
    }
}

/// Reader that keeps a copy of everything read through it.
pub(crate) struct TeeReader<R> {
    inner: R,
    captured: Vec<u8>,
}

impl<R: Read> TeeReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            captured: Vec::new(),
        }
    }

    /// Read the rest of the stream, then hand back every byte seen.
    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(self.captured)
    }
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.captured.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
