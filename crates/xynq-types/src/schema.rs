//! Type schemas.
//!
//! A schema is immutable once published and is identified by its address:
//! two values have the same type iff their schema references are pointer
//! equal. Basic numeric schemas live in statics; user-defined schemas are
//! leaked by the [`crate::TypeManager`] so every reference is `'static`.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SchemaFlags: u32 {
        const BASIC          = 1 << 0;
        const SIGNED_INT     = 1 << 1;
        const UNSIGNED_INT   = 1 << 2;
        const FLOATING_POINT = 1 << 3;
    }
}

pub type TypeSchemaRef = &'static TypeSchema;

/// One field of a composite schema. Offsets are precomputed at schema
/// creation using the standard aligned-layout rule.
#[derive(Debug)]
pub struct FieldSchema {
    pub name: &'static str,
    pub schema: TypeSchemaRef,
    pub offset: usize,
}

#[derive(Debug)]
pub struct TypeSchema {
    pub name: &'static str,
    pub alignment: usize,
    pub size: usize,
    pub flags: SchemaFlags,
    pub fields: Vec<FieldSchema>,
}

impl TypeSchema {
    #[inline]
    pub fn is_basic(&self) -> bool {
        self.flags.contains(SchemaFlags::BASIC)
    }

    #[inline]
    pub fn is_signed_int(&self) -> bool {
        self.flags.contains(SchemaFlags::SIGNED_INT)
    }

    #[inline]
    pub fn is_unsigned_int(&self) -> bool {
        self.flags.contains(SchemaFlags::UNSIGNED_INT)
    }

    #[inline]
    pub fn is_floating_point(&self) -> bool {
        self.flags.contains(SchemaFlags::FLOATING_POINT)
    }

    #[inline]
    pub fn is_integral(&self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        self.is_integral() || self.is_floating_point()
    }

    #[inline]
    pub fn is_str(&self) -> bool {
        std::ptr::eq(self, &STR)
    }

    #[inline]
    pub fn is_field(&self) -> bool {
        std::ptr::eq(self, &FIELD)
    }

    #[inline]
    pub fn is_frame_barrier(&self) -> bool {
        std::ptr::eq(self, &FRAME_BARRIER)
    }

    #[inline]
    pub fn same(a: TypeSchemaRef, b: TypeSchemaRef) -> bool {
        std::ptr::eq(a, b)
    }
}

macro_rules! basic_schema {
    ($name:ident, $text:literal, $align:literal, $size:literal, $flags:expr) => {
        pub static $name: TypeSchema = TypeSchema {
            name: $text,
            alignment: $align,
            size: $size,
            flags: $flags,
            fields: Vec::new(),
        };
    };
}

basic_schema!(INT8, "int8", 1, 1, SchemaFlags::BASIC.union(SchemaFlags::SIGNED_INT));
basic_schema!(INT16, "int16", 2, 2, SchemaFlags::BASIC.union(SchemaFlags::SIGNED_INT));
basic_schema!(INT32, "int32", 4, 4, SchemaFlags::BASIC.union(SchemaFlags::SIGNED_INT));
basic_schema!(INT64, "int64", 8, 8, SchemaFlags::BASIC.union(SchemaFlags::SIGNED_INT));
basic_schema!(UINT8, "uint8", 1, 1, SchemaFlags::BASIC.union(SchemaFlags::UNSIGNED_INT));
basic_schema!(UINT16, "uint16", 2, 2, SchemaFlags::BASIC.union(SchemaFlags::UNSIGNED_INT));
basic_schema!(UINT32, "uint32", 4, 4, SchemaFlags::BASIC.union(SchemaFlags::UNSIGNED_INT));
basic_schema!(UINT64, "uint64", 8, 8, SchemaFlags::BASIC.union(SchemaFlags::UNSIGNED_INT));
basic_schema!(FLOAT32, "float32", 4, 4, SchemaFlags::BASIC.union(SchemaFlags::FLOATING_POINT));
basic_schema!(FLOAT64, "float64", 8, 8, SchemaFlags::BASIC.union(SchemaFlags::FLOATING_POINT));

/// String views on the VM stack.
basic_schema!(STR, "string", 8, 16, SchemaFlags::BASIC);

/// Field-name values produced by `:name` tokens.
basic_schema!(FIELD, "field", 8, 16, SchemaFlags::empty());

/// Sentinel separating call frames on the VM stack. Never serialized.
basic_schema!(FRAME_BARRIER, "frame-barrier", 1, 0, SchemaFlags::empty());

/// The numeric schemas the type registry is seeded with. These are the
/// names `defstruct` field types resolve against.
pub fn basic_types() -> &'static [TypeSchemaRef] {
    static LIST: [TypeSchemaRef; 10] = [
        &INT8, &INT16, &INT32, &INT64, &UINT8, &UINT16, &UINT32, &UINT64, &FLOAT32, &FLOAT64,
    ];
    &LIST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_predicates() {
        assert!(INT64.is_basic());
        assert!(INT64.is_signed_int());
        assert!(INT64.is_numeric());
        assert!(!INT64.is_floating_point());
        assert!(UINT32.is_unsigned_int());
        assert!(FLOAT64.is_floating_point());
        assert!(!FLOAT64.is_integral());
        assert!(STR.is_str());
        assert!(!STR.is_numeric());
        assert!(FRAME_BARRIER.is_frame_barrier());
        assert!(FIELD.is_field());
    }

    #[test]
    fn identity_is_pointer_equality() {
        assert!(TypeSchema::same(&INT64, &INT64));
        assert!(!TypeSchema::same(&INT64, &UINT64));
    }
}
