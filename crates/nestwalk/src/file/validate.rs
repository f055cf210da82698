use super::reported_path;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::processor::{
    Capability, FileProcessor, Processor, ProcessorBase, ProcessorInit, StructureEntry,
    DEFAULT_OPERATION,
};
use std::io::{Read, Write};
use tracing::{debug, warn};

pub const MAGIC_ATTRIBUTE: &str = "magic";
pub const FAIL_ON_INVALID_ATTRIBUTE: &str = "fail-on-invalid";
pub const VALIDATE_OPERATION: &str = "validate";
pub const VALID_PROPERTY: &str = "valid";

/// Checks that content starts with a known byte signature.
///
/// The outcome is recorded under the processor's alias as claimant.
/// `validate` always fails on a mismatch; `process` only does when
/// `fail-on-invalid` is set.
#[derive(Debug, Default)]
pub struct SignatureValidator {
    base: ProcessorBase,
    magic: Vec<u8>,
    fail_on_invalid: bool,
}

impl SignatureValidator {
    pub const IMPLEMENTATION: &'static str = "nestwalk.file.SignatureValidator";

    fn check(
        &self,
        operation: &str,
        path: &str,
        input: &mut dyn Read,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let mut head = Vec::with_capacity(self.magic.len());
        input.take(self.magic.len() as u64).read_to_end(&mut head)?;
        let valid = head == self.magic;

        ctx.associate(
            self.alias(),
            path,
            [(VALID_PROPERTY.to_string(), valid.to_string())],
        );

        if valid {
            debug!(alias = %self.alias(), path = %path, "Signature matches");
            return Ok(());
        }
        warn!(
            alias = %self.alias(),
            path = %path,
            found = %hex::encode(&head),
            "Signature mismatch"
        );
        if self.fail_on_invalid || operation == VALIDATE_OPERATION {
            return Err(self.base.error(
                operation,
                format!("'{}' does not start with {}", path, hex::encode(&self.magic)),
            ));
        }
        Ok(())
    }
}

impl Processor for SignatureValidator {
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
        let magic = self.base.attribute(MAGIC_ATTRIBUTE).map(str::trim).unwrap_or_default();
        self.magic = hex::decode(magic.trim_start_matches("0x")).map_err(|e| {
            EngineError::Config(format!(
                "{}: attribute '{}' is not hex: {}",
                self.base.alias, MAGIC_ATTRIBUTE, e
            ))
        })?;
        if self.magic.is_empty() {
            return Err(EngineError::Config(format!(
                "{}: attribute '{}' is required",
                self.base.alias, MAGIC_ATTRIBUTE
            )));
        }
        self.fail_on_invalid = self.base.bool_attribute(FAIL_ON_INVALID_ATTRIBUTE, false)?;
        Ok(())
    }

    fn supports(&self, operation: &str) -> bool {
        operation == DEFAULT_OPERATION || operation == VALIDATE_OPERATION
    }
}

impl FileProcessor for SignatureValidator {
    fn process(
        &self,
        operation: &str,
        input: &mut dyn Read,
        _output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let path = reported_path(None, ctx);
        self.check(operation, &path, input, ctx)
    }

    fn process_entry(
        &self,
        operation: &str,
        entry: &StructureEntry,
        input: &mut dyn Read,
        _output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        self.check(operation, &entry.path, input, ctx)
    }
}
