//! Branch registry: an arena of branches, each behind its own lock.
//!
//! The branch is the unit of mutual exclusion. Operations against the same
//! branch serialize on that branch's mutex; operations against different
//! branches run fully in parallel. Nothing here performs I/O.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::model::Branch;

/// Arena of branches keyed by branch id
pub struct BranchRegistry {
    branches: DashMap<String, Arc<Mutex<Branch>>>,
}

impl BranchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            branches: DashMap::new(),
        }
    }

    /// Register or replace a branch
    pub fn add(&self, branch: Branch) {
        info!("🏢 Registering branch {} ({})", branch.name, branch.id);
        self.branches
            .insert(branch.id.clone(), Arc::new(Mutex::new(branch)));
    }

    /// Handle to a branch's lock
    pub fn get(&self, branch_id: &str) -> Result<Arc<Mutex<Branch>>> {
        self.branches
            .get(branch_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::not_found(format!("Branch {} not found", branch_id)))
    }

    /// Snapshot of a branch's current state
    pub fn snapshot(&self, branch_id: &str) -> Result<Branch> {
        Ok(self.get(branch_id)?.lock().clone())
    }

    /// Remove a branch from the arena
    pub fn remove(&self, branch_id: &str) -> Result<()> {
        if self.branches.remove(branch_id).is_none() {
            return Err(EngineError::not_found(format!(
                "Branch {} not found",
                branch_id
            )));
        }
        debug!("🏢 Removed branch {}", branch_id);
        Ok(())
    }

    /// Ids of every registered branch
    pub fn branch_ids(&self) -> Vec<String> {
        self.branches.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl Default for BranchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_branch() {
        let registry = BranchRegistry::new();
        registry.add(Branch::new("branch-1", "Main"));

        let handle = registry.get("branch-1").unwrap();
        assert_eq!(handle.lock().name, "Main");
        assert!(registry.get("branch-2").is_err());
    }

    #[test]
    fn test_mutation_through_handle_persists() {
        let registry = BranchRegistry::new();
        registry.add(Branch::new("branch-1", "Main"));

        {
            let handle = registry.get("branch-1").unwrap();
            handle.lock().set_auto_call_mode(true);
        }
        assert!(registry.snapshot("branch-1").unwrap().auto_call_mode());
    }

    #[test]
    fn test_remove_branch() {
        let registry = BranchRegistry::new();
        registry.add(Branch::new("branch-1", "Main"));
        assert_eq!(registry.len(), 1);
        registry.remove("branch-1").unwrap();
        assert!(registry.is_empty());
        assert!(registry.remove("branch-1").is_err());
    }
}
