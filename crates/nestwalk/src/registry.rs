//! Processor registry: implementation name → constructor.

use crate::error::{EngineError, Result};
use crate::file::{Checksum, Extract, RegexReplace, SignatureValidator};
use crate::processor::Processor;
use crate::structure::{DirectoryWalker, ZipProcessor};
use std::collections::BTreeMap;
use std::fmt;

type Factory = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Explicit table of the processor implementations a manager may build.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ProcessorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every bundled processor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(DirectoryWalker::IMPLEMENTATION, || Box::<DirectoryWalker>::default());
        registry.register(ZipProcessor::IMPLEMENTATION, || Box::<ZipProcessor>::default());
        registry.register(Checksum::IMPLEMENTATION, || Box::<Checksum>::default());
        registry.register(Extract::IMPLEMENTATION, || Box::<Extract>::default());
        registry.register(SignatureValidator::IMPLEMENTATION, || {
            Box::<SignatureValidator>::default()
        });
        registry.register(RegexReplace::IMPLEMENTATION, || Box::<RegexReplace>::default());
        registry
    }

    /// Register (or replace) the constructor for `implementation`.
    pub fn register<F>(&mut self, implementation: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.factories.insert(implementation.into(), Box::new(factory));
    }

    pub fn contains(&self, implementation: &str) -> bool {
        self.factories.contains_key(implementation)
    }

    pub fn implementations(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build an uninitialized processor.
    pub fn instantiate(&self, implementation: &str) -> Result<Box<dyn Processor>> {
        self.factories
            .get(implementation)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnknownProcessor(implementation.to_string()))
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}
