//! Dispatch state threaded through nested action lists.

use super::action::Action;
use crate::browser::ElementHandle;
use crate::error::{ActionDispatchError, DispatchResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Deepest chain of `reference`/`external` indirections before it is treated as a cycle
pub const MAX_REFERENCE_DEPTH: usize = 32;

/// Named action lists, read-only once a run starts
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    /// Environment `reference` lists
    pub references: HashMap<String, Vec<Action>>,
    /// Library name to its named lists
    pub libraries: HashMap<String, HashMap<String, Vec<Action>>>,
}

impl ReferenceTables {
    pub fn new(
        references: HashMap<String, Vec<Action>>,
        libraries: HashMap<String, HashMap<String, Vec<Action>>>,
    ) -> Self {
        Self {
            references,
            libraries,
        }
    }

    pub fn reference(&self, name: &str) -> Option<&[Action]> {
        self.references.get(name).map(Vec::as_slice)
    }

    pub fn external(&self, library: &str, name: &str) -> Option<&[Action]> {
        self.libraries
            .get(library)
            .and_then(|lists| lists.get(name))
            .map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// Element bound by the innermost `for_each`
    pub element: Option<ElementHandle>,
    /// Number of `for_each` elements entered so far, used in capture names
    pub iteration: u32,
    pub references: Arc<ReferenceTables>,
    stack: Vec<String>,
}

impl ActionContext {
    pub fn new(references: Arc<ReferenceTables>) -> Self {
        Self {
            element: None,
            iteration: 0,
            references,
            stack: Vec::new(),
        }
    }

    /// Names currently being dispatched, outermost first
    pub fn reference_stack(&self) -> &[String] {
        &self.stack
    }

    /// Record entry into a named list, refusing cycles and runaway depth
    pub(crate) fn enter(&mut self, name: String) -> DispatchResult<()> {
        if self.stack.contains(&name) || self.stack.len() >= MAX_REFERENCE_DEPTH {
            let mut chain = self.stack.clone();
            chain.push(name.clone());
            return Err(ActionDispatchError::ReferenceCycle {
                name,
                stack: chain.join(" -> "),
            });
        }
        self.stack.push(name);
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.stack.pop();
    }
}
