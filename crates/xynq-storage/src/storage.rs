//! Type-name → vault mapping.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use xynq_types::{TypeSchemaRef, TypeVault};

use crate::object::{Object, ObjectGuid, ObjectHandle};
use crate::vault::ObjectVault;

/// The store: one vault per registered composite type.
pub struct Storage {
    vaults: Mutex<HashMap<&'static str, Arc<ObjectVault>>>,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            vaults: Mutex::new(HashMap::new()),
        }
    }

    /// Find the vault for `type_name`, creating it if the type is a
    /// registered composite schema. Returns `None` for unknown or basic
    /// types.
    pub fn ensure_vault_with_type(
        &self,
        types: &TypeVault,
        type_name: &str,
    ) -> Option<Arc<ObjectVault>> {
        let mut vaults = self.vaults.lock();
        if let Some(vault) = vaults.get(type_name) {
            return Some(Arc::clone(vault));
        }

        let schema = types.find_schema(type_name)?;
        if schema.is_basic() {
            return None;
        }
        let vault = Arc::new(ObjectVault::new(schema));
        vaults.insert(schema.name, Arc::clone(&vault));
        Some(vault)
    }

    /// Create an object of the named type. The vault must already exist.
    pub fn create_object(
        &self,
        type_name: &str,
    ) -> Result<(ObjectHandle, TypeSchemaRef), String> {
        let vault = self
            .find_vault(type_name)
            .ok_or_else(|| "No storage for type".to_string())?;
        Ok((vault.create_object(), vault.schema()))
    }

    /// Visit every object of the named type. Returns false when no vault
    /// exists for it.
    pub fn enumerate(
        &self,
        type_name: &str,
        handler: impl FnMut(&Object, TypeSchemaRef),
    ) -> bool {
        match self.find_vault(type_name) {
            Some(vault) => {
                vault.enumerate(handler);
                true
            }
            None => false,
        }
    }

    /// Delete one object by guid. Returns whether anything was removed.
    pub fn delete_object(&self, type_name: &str, guid: ObjectGuid) -> bool {
        match self.find_vault(type_name) {
            Some(vault) => vault.remove(guid),
            None => false,
        }
    }

    fn find_vault(&self, type_name: &str) -> Option<Arc<ObjectVault>> {
        self.vaults.lock().get(type_name).cloned()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}
