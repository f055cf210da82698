//! Bundled file processors.

pub mod checksum;
pub mod extract;
pub mod transform;
pub mod validate;

use crate::context::ExecutionContext;
use crate::processor::StructureEntry;
use std::io::{self, Read, Write};

pub use checksum::Checksum;
pub use extract::Extract;
pub use transform::RegexReplace;
pub use validate::SignatureValidator;

/// Path a file processor reports for its input: the entry's
/// hierarchy-relative path, or the context name for a standalone file.
pub(crate) fn reported_path(entry: Option<&StructureEntry>, ctx: &ExecutionContext) -> String {
    match entry {
        Some(entry) => entry.path.clone(),
        None => ctx.current_name().to_string(),
    }
}

/// Copy the rest of `input` to `output`, or discard it.
pub(crate) fn copy_or_drain(
    input: &mut dyn Read,
    output: Option<&mut dyn Write>,
) -> io::Result<u64> {
    match output {
        Some(output) => {
            let copied = io::copy(input, output)?;
            output.flush()?;
            Ok(copied)
        }
        None => io::copy(input, &mut io::sink()),
    }
}
