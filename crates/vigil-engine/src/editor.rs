use tracing::info;

use vigil_core::{
    ListKind, NewEntry, PolicyEntry, ResourceKind, Result, VigilError, normalize_identifier,
};
use vigil_store::PolicyStore;

use crate::locks::KeyLocks;

const DEFAULT_PARENT_REASON: &str = "Set by your parent.";

/// Parent-driven list edits, serialized with decisions and appeals on the
/// same resource.
#[derive(Clone)]
pub struct PolicyEditor {
    store: PolicyStore,
    locks: KeyLocks,
}

impl PolicyEditor {
    pub fn new(store: PolicyStore, locks: KeyLocks) -> Self {
        Self { store, locks }
    }

    /// Put a resource on `list`, moving it off the other list if needed.
    pub async fn add(
        &self,
        kind: ResourceKind,
        list: ListKind,
        raw: &str,
        reason: Option<&str>,
    ) -> Result<PolicyEntry> {
        let identifier = normalize_identifier(kind, raw)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_PARENT_REASON);

        let _guard = self.locks.lock(kind, &identifier).await;
        let entry = self
            .store
            .upsert_entry(&NewEntry::new(kind, &identifier, list, reason))?;
        info!(resource = %identifier, %kind, list = list.as_str(), "list entry added");
        self.store.audit(
            &format!("{}_add", list.as_str()),
            Some(&identifier),
            Some(reason),
        )?;
        Ok(entry)
    }

    /// Delete a resource from `list`. `NotFound` when it is not on that list.
    pub async fn remove(&self, kind: ResourceKind, list: ListKind, raw: &str) -> Result<()> {
        let identifier = normalize_identifier(kind, raw)?;
        let _guard = self.locks.lock(kind, &identifier).await;
        if !self.store.remove_entry(kind, list, &identifier)? {
            return Err(VigilError::NotFound(format!(
                "'{identifier}' is not on the {}",
                list.as_str()
            )));
        }
        info!(resource = %identifier, %kind, list = list.as_str(), "list entry removed");
        self.store
            .audit(&format!("{}_remove", list.as_str()), Some(&identifier), None)?;
        Ok(())
    }
}
