//! Per-type object storage.

use std::collections::HashMap;

use parking_lot::Mutex;

use xynq_types::TypeSchemaRef;

use crate::object::{Object, ObjectGuid, ObjectHandle};

struct VaultInner {
    store: Vec<Box<Object>>,
    index: HashMap<ObjectGuid, usize>,
    next_guid: ObjectGuid,
}

/// Storage for objects of one schema.
pub struct ObjectVault {
    schema: TypeSchemaRef,
    inner: Mutex<VaultInner>,
}

impl ObjectVault {
    pub fn new(schema: TypeSchemaRef) -> Self {
        Self {
            schema,
            inner: Mutex::new(VaultInner {
                store: Vec::new(),
                index: HashMap::new(),
                next_guid: 1,
            }),
        }
    }

    pub fn schema(&self) -> TypeSchemaRef {
        self.schema
    }

    /// Create a zeroed object and return its handle.
    pub fn create_object(&self) -> ObjectHandle {
        let mut inner = self.inner.lock();
        let guid = inner.next_guid;
        inner.next_guid += 1;

        let mut object = Object::create(guid, self.schema);
        let handle: ObjectHandle = &mut *object;
        let slot = inner.store.len();
        inner.store.push(object);
        inner.index.insert(guid, slot);
        handle
    }

    /// Visit every object under the vault lock.
    pub fn enumerate(&self, mut handler: impl FnMut(&Object, TypeSchemaRef)) {
        let inner = self.inner.lock();
        for object in &inner.store {
            handler(object, self.schema);
        }
    }

    /// Delete by guid. Returns whether anything was removed. Outstanding
    /// handles to the removed object become invalid.
    pub fn remove(&self, guid: ObjectGuid) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.index.remove(&guid) else {
            return false;
        };
        inner.store.swap_remove(slot);
        if slot < inner.store.len() {
            let moved_guid = inner.store[slot].guid();
            inner.index.insert(moved_guid, slot);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use xynq_types::vault::TypeManager;

    fn sample_schema() -> TypeSchemaRef {
        // A fresh manager per test keeps names independent.
        let manager = Arc::new(TypeManager::with_basic_types());
        let vault = xynq_types::TypeVault::new(Arc::clone(&manager));
        vault
            .create_schema(
                "VaultTest",
                vec![("x".to_string(), &xynq_types::schema::INT64 as TypeSchemaRef)],
            )
            .unwrap()
    }

    #[test]
    fn create_enumerate_remove() {
        let vault = ObjectVault::new(sample_schema());
        let first = vault.create_object();
        let _second = vault.create_object();
        assert_eq!(vault.len(), 2);

        let mut guids = Vec::new();
        vault.enumerate(|object, _schema| guids.push(object.guid()));
        assert_eq!(guids, vec![1, 2]);

        let first_guid = unsafe { (*first).guid() };
        assert!(vault.remove(first_guid));
        assert!(!vault.remove(first_guid));
        assert_eq!(vault.len(), 1);

        let mut guids = Vec::new();
        vault.enumerate(|object, _schema| guids.push(object.guid()));
        assert_eq!(guids, vec![2]);
    }

    #[test]
    fn guids_keep_increasing() {
        let vault = ObjectVault::new(sample_schema());
        let a = vault.create_object();
        let a_guid = unsafe { (*a).guid() };
        vault.remove(a_guid);
        let b = vault.create_object();
        assert!(unsafe { (*b).guid() } > a_guid);
    }
}
