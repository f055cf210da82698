//! Error types for the processing engine

use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failure raised while invoking an operation on a configured processor.
///
/// Carries the offending `alias:operation` pair and the message of the
/// innermost cause, so callers see the failing processor rather than the
/// wrapper chain around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorError {
    pub alias: String,
    pub operation: String,
    pub message: String,
}

impl ProcessorError {
    pub fn new(
        alias: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// `alias:operation`, the form used in logs and error text.
    pub fn target(&self) -> String {
        format!("{}:{}", self.alias, self.operation)
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.alias, self.operation, self.message)
    }
}

impl StdError for ProcessorError {}

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown processor implementation: {0}")]
    UnknownProcessor(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Pipeline not prepared")]
    NotPrepared,
}

impl From<regex::Error> for EngineError {
    fn from(err: regex::Error) -> Self {
        EngineError::Pattern(err.to_string())
    }
}

impl EngineError {
    /// Returns the processor error when this is a dispatch failure.
    pub fn as_processor_error(&self) -> Option<&ProcessorError> {
        match self {
            EngineError::Processor(err) => Some(err),
            _ => None,
        }
    }

    /// Message of the innermost cause in the `source()` chain.
    pub fn root_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            message = err.to_string();
            source = err.source();
        }
        message
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
