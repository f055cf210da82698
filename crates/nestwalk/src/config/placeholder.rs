//! `${name}` placeholder substitution against a [`Properties`] set.

use super::Properties;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Shortest placeholder the resolver accepts: `${x}`.
const MIN_PLACEHOLDER_LEN: usize = 4;

/// Upper bound on substitutions per input, so self-referencing
/// properties (`a = "${a}"`) cannot loop forever.
const MAX_EXPANSIONS: usize = 32;

/// How placeholders are located in a string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// First `${` with the first `}` after it; the whole string is
    /// re-resolved after every substitution.
    #[default]
    NonNested,
    /// First `${` with the last `}` of the string, so `${outer-${inner}}`
    /// resolves `inner` before looking up the outer key.
    Nested,
}

impl ResolutionMode {
    pub fn resolve(self, text: &str, properties: &Properties) -> String {
        match self {
            ResolutionMode::NonNested => resolve(text, properties),
            ResolutionMode::Nested => resolve_nested(text, properties),
        }
    }
}

/// Resolve placeholders left to right.
///
/// Substituted values are trimmed and may themselves contain placeholders.
/// Resolution stops at the first placeholder whose property is absent,
/// leaving it (and anything after it) unexpanded.
pub fn resolve(text: &str, properties: &Properties) -> String {
    let mut current = text.trim().to_string();
    for _ in 0..MAX_EXPANSIONS {
        let Some(start) = current.find("${") else {
            return current;
        };
        let Some(offset) = current[start..].find('}') else {
            return current;
        };
        let end = start + offset;
        if end + 1 - start < MIN_PLACEHOLDER_LEN {
            return current;
        }

        match properties.get(&current[start + 2..end]) {
            Some(value) => {
                current = format!("{}{}{}", &current[..start], value.trim(), &current[end + 1..]);
            }
            None => return current,
        }
    }

    warn!(text = %text, "Placeholder expansion limit reached");
    current
}

/// Resolve placeholders whose names may contain further placeholders.
///
/// Pairs the first `${` with the last `}` of the string. Strings holding
/// several sibling placeholders (`${a}-${b}`) therefore do not resolve.
pub fn resolve_nested(text: &str, properties: &Properties) -> String {
    let mut budget = MAX_EXPANSIONS;
    let trimmed = text.trim();
    let resolved = resolve_nested_inner(trimmed, properties, &mut budget);
    if budget == 0 {
        warn!(text = %text, "Placeholder expansion limit reached");
    }
    resolved
}

fn resolve_nested_inner(text: &str, properties: &Properties, budget: &mut usize) -> String {
    let Some(start) = text.find("${") else {
        return text.to_string();
    };
    let Some(end) = text.rfind('}') else {
        return text.to_string();
    };
    if end < start || end + 1 - start < MIN_PLACEHOLDER_LEN || *budget == 0 {
        return text.to_string();
    }
    *budget -= 1;

    let key = resolve_nested_inner(&text[start + 2..end], properties, budget);
    match properties.get(&key) {
        Some(value) => {
            let expanded = format!("{}{}{}", &text[..start], value.trim(), &text[end + 1..]);
            resolve_nested_inner(&expanded, properties, budget)
        }
        None => text.to_string(),
    }
}
