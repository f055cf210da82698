use super::reported_path;
use crate::config::ConfigNode;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::processor::{Capability, FileProcessor, Processor, ProcessorBase, StructureEntry};
use regex::Regex;
use std::io::{Read, Write};
use tracing::debug;

pub const RULE_NODE: &str = "rule";
pub const REPLACEMENTS_PROPERTY: &str = "replacements";

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    replacement: String,
}

/// Rewrites UTF-8 content with an ordered list of regex rules.
///
/// Rules come from `rule` child nodes of the declaration:
///
/// ```toml
/// [[pipeline.children.children]]
/// name = "rule"
/// attributes = { pattern = "\\r\\n", replacement = "\n" }
/// ```
///
/// The number of replacements is recorded under the processor's alias.
#[derive(Debug, Default)]
pub struct RegexReplace {
    base: ProcessorBase,
    rules: Vec<Rule>,
}

impl RegexReplace {
    pub const IMPLEMENTATION: &'static str = "nestwalk.file.RegexReplace";

    fn parse_rule(&self, node: &ConfigNode) -> Result<Rule> {
        if node.name != RULE_NODE {
            return Err(EngineError::Config(format!(
                "{}: unexpected configuration node '{}', expected '{}'",
                self.base.alias, node.name, RULE_NODE
            )));
        }
        let pattern = node.attribute("pattern").ok_or_else(|| {
            EngineError::Config(format!("{}: rule without a 'pattern'", self.base.alias))
        })?;
        Ok(Rule {
            pattern: Regex::new(pattern)?,
            replacement: node.attribute("replacement").unwrap_or_default().to_string(),
        })
    }

    fn transform(
        &self,
        operation: &str,
        path: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;
        let mut text = String::from_utf8(raw)
            .map_err(|_| self.base.error(operation, format!("'{}' is not UTF-8 text", path)))?;

        let mut replacements = 0usize;
        for rule in &self.rules {
            let found = rule.pattern.find_iter(&text).count();
            if found > 0 {
                replacements += found;
                text = rule
                    .pattern
                    .replace_all(&text, rule.replacement.as_str())
                    .into_owned();
            }
        }

        if let Some(output) = output {
            output.write_all(text.as_bytes())?;
            output.flush()?;
        }
        debug!(alias = %self.alias(), path = %path, replacements, "Applied rules");
        ctx.associate(
            self.alias(),
            path,
            [(REPLACEMENTS_PROPERTY.to_string(), replacements.to_string())],
        );
        Ok(())
    }
}

impl Processor for RegexReplace {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn capability(&self) -> Capability<'_> {
        Capability::File(self)
    }

    fn set_configuration(&mut self, node: ConfigNode) -> Result<()> {
        self.rules = node
            .children
            .iter()
            .map(|child| self.parse_rule(child))
            .collect::<Result<Vec<_>>>()?;
        debug!(alias = %self.base.alias, rules = self.rules.len(), "Compiled replacement rules");
        self.base.configuration = Some(node);
        Ok(())
    }
}

impl FileProcessor for RegexReplace {
    fn process(
        &self,
        operation: &str,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let path = reported_path(None, ctx);
        self.transform(operation, &path, input, output, ctx)
    }

    fn process_entry(
        &self,
        operation: &str,
        entry: &StructureEntry,
        input: &mut dyn Read,
        output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        self.transform(operation, &entry.path, input, output, ctx)
    }

    fn produces_output(&self) -> bool {
        true
    }
}
