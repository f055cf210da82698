use super::{EntrySelection, Processor};
use std::fmt;
use std::sync::Arc;

/// `(selection, processor, operation)`: the unit of dispatch.
#[derive(Clone)]
pub struct Action {
    selection: EntrySelection,
    processor: Arc<dyn Processor>,
    operation: String,
}

impl Action {
    pub fn new(
        selection: EntrySelection,
        processor: Arc<dyn Processor>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            selection,
            processor,
            operation: operation.into(),
        }
    }

    pub fn selection(&self) -> &EntrySelection {
        &self.selection
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn alias(&self) -> &str {
        self.processor.alias()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.selection.matches(path)
    }

    /// First action, in declaration order, whose selection accepts `path`.
    pub fn first_match<'a>(actions: &'a [Action], path: &str) -> Option<&'a Action> {
        actions.iter().find(|action| action.matches(path))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("alias", &self.processor.alias())
            .field("operation", &self.operation)
            .field("selection", &self.selection)
            .field("actions", &self.processor.actions())
            .finish()
    }
}
