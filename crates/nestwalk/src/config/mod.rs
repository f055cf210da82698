//! Pipeline configuration
//!
//! A pipeline is declared as a tree of [`ConfigNode`]s loaded from TOML:
//!
//! ```toml
//! [pipeline]
//! name = "pipeline"
//!
//! [[pipeline.children]]
//! name = "process"
//! namespace = "processor:nestwalk.structure.DirectoryWalker#walker"
//! attributes = { digests = "md5,sha-256" }
//!
//! [[pipeline.children.children]]
//! name = "process"
//! namespace = "processor:nestwalk.file.Checksum"
//! attributes = { pattern = "*.txt" }
//! ```
//!
//! A node whose namespace uses the `processor:` scheme declares a processor;
//! the `name` of such a node is the operation its parent invokes on it.

pub mod placeholder;

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use placeholder::{resolve, resolve_nested, ResolutionMode};

/// One node of the declarative configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    /// Element name. For processor declarations this is the operation name.
    #[serde(default)]
    pub name: String,

    /// Identifies the processor implementation governing this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ConfigNode>,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Top-level pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline: ConfigNode,
}

impl PipelineConfig {
    /// Load a pipeline from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save a pipeline to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Flat set of named properties used for `${name}` substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` into this set; keys in `other` win.
    pub fn extend(&mut self, other: Properties) {
        self.values.extend(other.values);
    }

    /// Load properties from a TOML file.
    ///
    /// Scalars become string values; nested tables are flattened with
    /// `.`-joined keys. Arrays are rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut properties = Properties::new();
        flatten_into(&mut properties, "", &table)?;
        Ok(properties)
    }

    /// Parse a `key=value` pair as given on the command line.
    pub fn parse_pair(pair: &str) -> Result<(String, String)> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| EngineError::Config(format!("Expected key=value, got '{}'", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(EngineError::Config(format!("Empty property name in '{}'", pair)));
        }
        Ok((key.to_string(), value.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn flatten_into(properties: &mut Properties, prefix: &str, table: &toml::Table) -> Result<()> {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::String(s) => properties.insert(full_key, s.clone()),
            toml::Value::Integer(i) => properties.insert(full_key, i.to_string()),
            toml::Value::Float(f) => properties.insert(full_key, f.to_string()),
            toml::Value::Boolean(b) => properties.insert(full_key, b.to_string()),
            toml::Value::Datetime(d) => properties.insert(full_key, d.to_string()),
            toml::Value::Table(inner) => flatten_into(properties, &full_key, inner)?,
            toml::Value::Array(_) => {
                return Err(EngineError::Config(format!(
                    "Property '{}' is an array; only scalars are supported",
                    full_key
                )))
            }
        }
    }
    Ok(())
}
