use crate::host::{HostEntity, ObjectId};
use crate::state::{Handle, ScriptState};
use std::collections::HashMap;

/// Bidirectional handle ↔ entity bookkeeping.
///
/// The forward map can briefly hold handles the runtime has already swept
/// (their finalizer has not run yet), so every cache hit is re-validated
/// against the runtime before it is reused.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    by_handle: HashMap<Handle, HostEntity>,
    by_object: HashMap<ObjectId, Handle>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live handle previously issued for `entity`, if any. A swept handle is
    /// reported as a miss.
    pub fn cached_handle(&self, state: &ScriptState, entity: &HostEntity) -> Option<Handle> {
        let HostEntity::Object(object) = entity else {
            return None;
        };
        let handle = *self.by_object.get(&object.id())?;
        if state.is_live(handle) {
            return Some(handle);
        }
        tracing::warn!(
            %handle,
            object = ?object,
            "cached handle was collected before finalization"
        );
        None
    }

    pub fn insert(&mut self, handle: Handle, entity: HostEntity) {
        if let HostEntity::Object(object) = &entity {
            self.by_object.insert(object.id(), handle);
        }
        tracing::trace!(%handle, entity = %entity.describe(), "registered handle");
        self.by_handle.insert(handle, entity);
    }

    pub fn get(&self, handle: Handle) -> Option<&HostEntity> {
        self.by_handle.get(&handle)
    }

    pub fn handle_of(&self, id: ObjectId) -> Option<Handle> {
        self.by_object.get(&id).copied()
    }

    /// Drops both directions for `handle`. The reverse entry is only removed
    /// while it still points at `handle`, since a fresher handle may own the
    /// object by now. Returns `false` when nothing was registered.
    pub fn finalize(&mut self, handle: Handle) -> bool {
        let Some(entity) = self.by_handle.remove(&handle) else {
            return false;
        };
        if let HostEntity::Object(object) = &entity {
            let id = object.id();
            if self.by_object.get(&id) == Some(&handle) {
                self.by_object.remove(&id);
            }
        }
        tracing::trace!(%handle, "finalized handle");
        true
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
