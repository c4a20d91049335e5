//! Accepted trees and the scopes pointing at them
//!
//! Trees are stored once per content handle and shared behind `Arc`, so
//! re-scoping is a pointer swap and an in-flight evaluation keeps the tree
//! it started with.

use super::{ConditionTree, TreeHandle};
use crate::primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a tree applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every call to the target
    Target(Address),
    /// Calls to the target with this 4-byte selector
    Function(Address, [u8; 4]),
}

#[derive(Debug, Default)]
pub struct ConditionStore {
    trees: HashMap<TreeHandle, Arc<ConditionTree>>,
    scopes: HashMap<Scope, TreeHandle>,
}

impl ConditionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an accepted tree; an identical tree already stored is kept
    pub fn insert(&mut self, tree: ConditionTree) -> TreeHandle {
        let handle = tree.handle();
        self.trees.entry(handle).or_insert_with(|| Arc::new(tree));
        handle
    }

    pub fn get(&self, handle: &TreeHandle) -> Option<Arc<ConditionTree>> {
        self.trees.get(handle).cloned()
    }

    pub fn contains(&self, handle: &TreeHandle) -> bool {
        self.trees.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Point a scope at a stored tree, returning the handle it replaced
    ///
    /// Returns `None` without changing anything if the handle is unknown.
    pub fn assign(&mut self, scope: Scope, handle: TreeHandle) -> Option<Option<TreeHandle>> {
        if !self.contains(&handle) {
            return None;
        }
        Some(self.scopes.insert(scope, handle))
    }

    pub fn unassign(&mut self, scope: &Scope) -> Option<TreeHandle> {
        self.scopes.remove(scope)
    }

    /// Tree for a call: the function scope wins over the target-wide scope
    pub fn resolve(&self, target: &Address, selector: Option<[u8; 4]>) -> Option<TreeHandle> {
        selector
            .and_then(|selector| self.scopes.get(&Scope::Function(*target, selector)))
            .or_else(|| self.scopes.get(&Scope::Target(*target)))
            .copied()
    }
}
