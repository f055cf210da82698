//! Entry selection: which entries an action applies to.

use crate::error::{EngineError, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;

pub const PATTERN_ATTRIBUTE: &str = "pattern";
pub const REGEX_ATTRIBUTE: &str = "regex";
pub const CONTAINS_ATTRIBUTE: &str = "contains";
pub const NAME_ATTRIBUTE: &str = "name";
pub const CASE_INSENSITIVE_ATTRIBUTE: &str = "case-insensitive";

/// Turn a declared `pattern` into a glob over entry paths.
///
/// Entry paths are `/` separated and relative to the enclosing structure:
/// the walked root for files, the archive itself for its members. A bare
/// file pattern such as `*.zip` applies at every depth. A pattern holding a
/// `/`, or starting with `/` or `./`, is anchored at the structure root.
pub fn normalize_entry_pattern(raw: &str) -> String {
    let trimmed = raw.trim();
    let relative = trimmed.trim_start_matches("./").trim_start_matches('/');
    let anchored = relative.len() != trimmed.len() || relative.contains('/');
    match relative {
        "" | "**" => "**".to_string(),
        _ if anchored => relative.to_string(),
        "*" => "**".to_string(),
        _ => format!("**/{}", relative),
    }
}

/// Compile a normalized pattern; `*` never crosses a `/`.
pub fn build_matcher(glob_pattern: &str, case_insensitive: bool) -> Result<GlobMatcher> {
    GlobBuilder::new(glob_pattern)
        .case_insensitive(case_insensitive)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| EngineError::Pattern(format!("{}: {}", glob_pattern, e)))
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(GlobMatcher),
    Regex(Regex),
    Contains { needle: String, case_insensitive: bool },
    Name { name: String, case_insensitive: bool },
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Glob(glob) => glob.is_match(path),
            Matcher::Regex(regex) => regex.is_match(path),
            Matcher::Contains {
                needle,
                case_insensitive,
            } => {
                if *case_insensitive {
                    path.to_lowercase().contains(needle.as_str())
                } else {
                    path.contains(needle.as_str())
                }
            }
            Matcher::Name {
                name,
                case_insensitive,
            } => {
                let file_name = path.rsplit('/').next().unwrap_or(path);
                if *case_insensitive {
                    file_name.to_lowercase() == *name
                } else {
                    file_name == name
                }
            }
        }
    }
}

/// Immutable predicate over entry paths, built from declared attributes.
///
/// Every declared matcher must accept the path; a selection without
/// matchers accepts everything.
#[derive(Debug, Clone)]
pub struct EntrySelection {
    operation: String,
    matchers: Vec<Matcher>,
}

impl EntrySelection {
    /// Selection accepting every entry.
    pub fn any(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            matchers: Vec::new(),
        }
    }

    pub fn from_attributes(attributes: &BTreeMap<String, String>, operation: &str) -> Result<Self> {
        let case_insensitive = match attributes.get(CASE_INSENSITIVE_ATTRIBUTE) {
            None => false,
            Some(value) => super::parse_bool(value).ok_or_else(|| {
                EngineError::Config(format!(
                    "attribute '{}' must be a boolean, got '{}'",
                    CASE_INSENSITIVE_ATTRIBUTE, value
                ))
            })?,
        };

        let mut matchers = Vec::new();
        if let Some(pattern) = attributes.get(PATTERN_ATTRIBUTE) {
            let normalized = normalize_entry_pattern(pattern);
            matchers.push(Matcher::Glob(build_matcher(&normalized, case_insensitive)?));
        }
        if let Some(expression) = attributes.get(REGEX_ATTRIBUTE) {
            let regex = RegexBuilder::new(expression)
                .case_insensitive(case_insensitive)
                .build()?;
            matchers.push(Matcher::Regex(regex));
        }
        if let Some(needle) = attributes.get(CONTAINS_ATTRIBUTE) {
            matchers.push(Matcher::Contains {
                needle: fold(needle, case_insensitive),
                case_insensitive,
            });
        }
        if let Some(name) = attributes.get(NAME_ATTRIBUTE) {
            matchers.push(Matcher::Name {
                name: fold(name, case_insensitive),
                case_insensitive,
            });
        }

        Ok(Self {
            operation: operation.to_string(),
            matchers,
        })
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn accepts_everything(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Match a hierarchy-relative path.
    pub fn matches(&self, path: &str) -> bool {
        let candidate = path.trim_start_matches('/');
        self.matchers.iter().all(|m| m.matches(candidate))
    }
}

fn fold(value: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}
