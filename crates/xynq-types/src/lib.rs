//! # xynq-types — schemas, tagged values and serialization
//!
//! The dynamic type layer the VM and the object store share:
//!
//! - [`TypeSchema`] describes a type (family flags, layout, fields); basic
//!   numeric schemas are statics, user schemas are published through the
//!   [`TypeManager`] and referred to by pointer identity forever after.
//! - [`TypedValue`] is the `(schema, value)` pair that flows across the VM
//!   stack and into host functions.
//! - [`JsonSerializer`] renders program results onto a `StreamWriter`.

pub mod json;
pub mod schema;
pub mod value;
pub mod vault;

pub use json::{DummySerializer, JsonSerializer, SerializeResult, Serializer};
pub use xynq_base::StrSpan;
pub use schema::{FieldSchema, SchemaFlags, TypeSchema, TypeSchemaRef};
pub use value::{TypedValue, Value};
pub use vault::{SchemaError, TypeManager, TypeVault};
