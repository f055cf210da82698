//! Chain of enclosing processors.
//!
//! A persistent list: [`Lineage::push`] returns a new lineage sharing its
//! tail with the old one, so sibling subtrees of the configuration each see
//! their own chain without copying.

use std::fmt;
use std::sync::Arc;

/// Identity of an enclosing processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorRef {
    pub implementation: String,
    pub alias: String,
}

impl ProcessorRef {
    pub fn new(implementation: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            alias: alias.into(),
        }
    }
}

#[derive(Debug)]
struct Link {
    processor: ProcessorRef,
    outer: Option<Arc<Link>>,
}

#[derive(Clone, Default)]
pub struct Lineage {
    innermost: Option<Arc<Link>>,
    len: usize,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// New lineage with `processor` as the innermost element.
    pub fn push(&self, processor: ProcessorRef) -> Lineage {
        Lineage {
            innermost: Some(Arc::new(Link {
                processor,
                outer: self.innermost.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn innermost(&self) -> Option<&ProcessorRef> {
        self.innermost.as_deref().map(|link| &link.processor)
    }

    /// Enclosing processors, outermost first.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessorRef> {
        let mut refs = Vec::with_capacity(self.len);
        let mut link = self.innermost.as_deref();
        while let Some(current) = link {
            refs.push(&current.processor);
            link = current.outer.as_deref();
        }
        refs.into_iter().rev()
    }

    pub fn contains_implementation(&self, implementation: &str) -> bool {
        self.iter().any(|r| r.implementation == implementation)
    }
}

impl fmt::Debug for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|r| &r.alias)).finish()
    }
}
