use crate::codegen::DispatchTable;
use crate::host::HostEntity;
use crate::types::TypeRef;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Identifies one generated dispatch table. Objects and types of the same
/// host type get separate tables because they expose different members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Object(TypeRef),
    Type(TypeRef),
    Group(Vec<TypeRef>),
}

impl CacheKey {
    pub fn for_entity(entity: &HostEntity) -> Self {
        match entity {
            HostEntity::Object(object) => CacheKey::Object(object.type_ref().clone()),
            HostEntity::Type(ty) => CacheKey::Type(ty.clone()),
            HostEntity::GenericGroup(group) => CacheKey::Group(group.type_set()),
        }
    }
}

/// Generated tables, shared by every handle of the same key.
#[derive(Default)]
pub struct DispatchCache {
    tables: RefCell<HashMap<CacheKey, Rc<DispatchTable>>>,
    generated: Cell<usize>,
}

impl DispatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the table for `key`, generating it on first use.
    ///
    /// No borrow is held while `generate` runs, so generation may push other
    /// handles through the same cache.
    pub fn get_or_create(
        &self,
        key: &CacheKey,
        generate: impl FnOnce() -> DispatchTable,
    ) -> Rc<DispatchTable> {
        if let Some(existing) = self.tables.borrow().get(key).cloned() {
            return existing;
        }

        let table = Rc::new(generate());
        self.generated.set(self.generated.get() + 1);
        tracing::debug!(?key, members = table.member_count(), "generated dispatch table");
        self.tables
            .borrow_mut()
            .entry(key.clone())
            .or_insert(table)
            .clone()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Rc<DispatchTable>> {
        self.tables.borrow().get(key).cloned()
    }

    /// Number of times a table has been generated.
    pub fn generated(&self) -> usize {
        self.generated.get()
    }

    pub fn len(&self) -> usize {
        self.tables.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.borrow().is_empty()
    }

    #[cfg(test)]
    pub fn clear(&self) {
        self.tables.borrow_mut().clear();
    }
}
