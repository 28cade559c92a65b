//! Type registry.
//!
//! [`TypeManager`] owns the master list of published schemas. Each worker
//! gets a [`TypeVault`], a cache that lazily ingests schemas published
//! since its last lookup. Publication takes the writer lock so duplicate
//! names cannot race in; lookups take the reader lock only when the cache
//! is behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::schema::{self, FieldSchema, SchemaFlags, TypeSchema, TypeSchemaRef};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Type '{0}' already exists.")]
    Duplicate(String),
}

/// Master list of published schemas. Schemas are leaked on publication so
/// references stay `'static` and comparable by address for the process
/// lifetime (nothing ever unpublishes a type).
pub struct TypeManager {
    types: RwLock<Vec<TypeSchemaRef>>,
}

impl TypeManager {
    pub fn new(initial: &[TypeSchemaRef]) -> Self {
        Self {
            types: RwLock::new(initial.to_vec()),
        }
    }

    /// Manager seeded with the basic numeric schemas `defstruct` fields
    /// resolve against.
    pub fn with_basic_types() -> Self {
        Self::new(schema::basic_types())
    }

    fn publish(
        &self,
        name: &str,
        fields: Vec<(String, TypeSchemaRef)>,
    ) -> Result<TypeSchemaRef, SchemaError> {
        let mut list = self.types.write();
        if list.iter().any(|s| s.name == name) {
            return Err(SchemaError::Duplicate(name.to_string()));
        }

        // Standard layout: align each field up, total alignment is the max,
        // size gets tail padding.
        let mut offset = 0usize;
        let mut alignment = 1usize;
        let mut laid_out = Vec::with_capacity(fields.len());
        for (field_name, field_schema) in fields {
            offset = align_up(offset, field_schema.alignment.max(1));
            laid_out.push(FieldSchema {
                name: Box::leak(field_name.into_boxed_str()),
                schema: field_schema,
                offset,
            });
            offset += field_schema.size;
            alignment = alignment.max(field_schema.alignment);
        }
        let size = align_up(offset, alignment);

        let published: TypeSchemaRef = Box::leak(Box::new(TypeSchema {
            name: Box::leak(name.to_string().into_boxed_str()),
            alignment,
            size,
            flags: SchemaFlags::empty(),
            fields: laid_out,
        }));
        list.push(published);
        tracing::info!(target: "xynq::types", "Added new type '{}'", published.name);
        Ok(published)
    }

    fn ingest_into(&self, cache: &mut HashMap<&'static str, TypeSchemaRef>, seen: usize) -> usize {
        let list = self.types.read();
        for schema in &list[seen..] {
            cache.insert(schema.name, schema);
        }
        list.len()
    }
}

/// Per-worker schema cache.
pub struct TypeVault {
    manager: Arc<TypeManager>,
    cache: Mutex<HashMap<&'static str, TypeSchemaRef>>,
    seen: AtomicUsize,
}

impl TypeVault {
    pub fn new(manager: Arc<TypeManager>) -> Self {
        Self {
            manager,
            cache: Mutex::new(HashMap::new()),
            seen: AtomicUsize::new(0),
        }
    }

    /// Look a schema up by name, refreshing the cache from the manager if
    /// new schemas were published since the last call.
    pub fn find_schema(&self, name: &str) -> Option<TypeSchemaRef> {
        let mut cache = self.cache.lock();
        let seen = self.seen.load(Ordering::Acquire);
        if self.manager.types.read().len() != seen {
            let new_seen = self.manager.ingest_into(&mut cache, seen);
            self.seen.store(new_seen, Ordering::Release);
        }
        cache.get(name).copied()
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.find_schema(name).is_some()
    }

    /// Publish a new composite schema. Field layout is computed here;
    /// duplicate names fail.
    pub fn create_schema(
        &self,
        name: &str,
        fields: Vec<(String, TypeSchemaRef)>,
    ) -> Result<TypeSchemaRef, SchemaError> {
        self.manager.publish(name, fields)
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<TypeManager> {
        Arc::new(TypeManager::with_basic_types())
    }

    #[test]
    fn finds_basic_types() {
        let vault = TypeVault::new(manager());
        assert!(vault.has_type("int64"));
        assert!(vault.has_type("float32"));
        assert!(!vault.has_type("no-such-type"));
    }

    #[test]
    fn layout_follows_alignment_rules() {
        let vault = TypeVault::new(manager());
        let schema = vault
            .create_schema(
                "Mixed",
                vec![
                    ("a".to_string(), &schema::UINT8 as TypeSchemaRef),
                    ("b".to_string(), &schema::INT64),
                    ("c".to_string(), &schema::UINT16),
                ],
            )
            .unwrap();

        assert_eq!(schema.fields[0].offset, 0);
        assert_eq!(schema.fields[1].offset, 8);
        assert_eq!(schema.fields[2].offset, 16);
        assert_eq!(schema.alignment, 8);
        assert_eq!(schema.size, 24); // tail padded to alignment
    }

    #[test]
    fn duplicate_names_rejected() {
        let vault = TypeVault::new(manager());
        vault.create_schema("Dup", vec![]).unwrap();
        assert!(matches!(
            vault.create_schema("Dup", vec![]),
            Err(SchemaError::Duplicate(_))
        ));
    }

    #[test]
    fn vaults_see_later_publications() {
        let manager = manager();
        let vault_a = TypeVault::new(Arc::clone(&manager));
        let vault_b = TypeVault::new(Arc::clone(&manager));

        // Warm vault_b's cache before the type exists.
        assert!(!vault_b.has_type("Late"));

        vault_a
            .create_schema("Late", vec![("x".to_string(), &schema::INT32 as TypeSchemaRef)])
            .unwrap();

        let found = vault_b.find_schema("Late").unwrap();
        assert_eq!(found.name, "Late");
        assert!(TypeSchema::same(found, vault_a.find_schema("Late").unwrap()));
    }
}
