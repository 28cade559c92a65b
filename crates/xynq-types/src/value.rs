//! Tagged values.

use xynq_base::StrSpan;

use crate::schema::{self, TypeSchemaRef};

/// Value storage. The used arm matches the schema's family; the checked
/// getters on [`TypedValue`] enforce that at the boundaries.
#[derive(Clone, Copy, Debug)]
pub enum Value {
    U64(u64),
    I64(i64),
    F64(f64),
    /// Pointer into the object store (composite values).
    Ptr(*const u8),
    /// Arena-backed string view.
    Str(StrSpan),
}

/// Schema + value pair. Copyable; strings and object pointers are views
/// whose backing storage outlives the request.
#[derive(Clone, Copy, Debug)]
pub struct TypedValue {
    pub schema: TypeSchemaRef,
    pub value: Value,
}

impl TypedValue {
    pub fn int64(v: i64) -> Self {
        Self {
            schema: &schema::INT64,
            value: Value::I64(v),
        }
    }

    pub fn uint64(v: u64) -> Self {
        Self {
            schema: &schema::UINT64,
            value: Value::U64(v),
        }
    }

    pub fn float64(v: f64) -> Self {
        Self {
            schema: &schema::FLOAT64,
            value: Value::F64(v),
        }
    }

    pub fn str_span(span: StrSpan) -> Self {
        Self {
            schema: &schema::STR,
            value: Value::Str(span),
        }
    }

    pub fn field(span: StrSpan) -> Self {
        Self {
            schema: &schema::FIELD,
            value: Value::Str(span),
        }
    }

    pub fn frame_barrier() -> Self {
        Self {
            schema: &schema::FRAME_BARRIER,
            value: Value::U64(0),
        }
    }

    pub fn object(schema: TypeSchemaRef, data: *const u8) -> Self {
        Self {
            schema,
            value: Value::Ptr(data),
        }
    }

    #[inline]
    pub fn is_frame_barrier(&self) -> bool {
        self.schema.is_frame_barrier()
    }

    /// Checked numeric read coercing within the numeric families; `None`
    /// for non-numeric values.
    pub fn as_i64(&self) -> Option<i64> {
        match (self.numeric_family(), self.value) {
            (Family::Signed, Value::I64(v)) => Some(v),
            (Family::Unsigned, Value::U64(v)) => Some(v as i64),
            (Family::Float, Value::F64(v)) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match (self.numeric_family(), self.value) {
            (Family::Signed, Value::I64(v)) => Some(v as u64),
            (Family::Unsigned, Value::U64(v)) => Some(v),
            (Family::Float, Value::F64(v)) => Some(v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match (self.numeric_family(), self.value) {
            (Family::Signed, Value::I64(v)) => Some(v as f64),
            (Family::Unsigned, Value::U64(v)) => Some(v as f64),
            (Family::Float, Value::F64(v)) => Some(v),
            _ => None,
        }
    }

    /// String view; `None` unless this is a string value.
    pub fn as_str_span(&self) -> Option<StrSpan> {
        if !self.schema.is_str() {
            return None;
        }
        match self.value {
            Value::Str(span) => Some(span),
            _ => None,
        }
    }

    /// Field-name view; `None` unless this is a `:name` value.
    pub fn as_field_span(&self) -> Option<StrSpan> {
        if !self.schema.is_field() {
            return None;
        }
        match self.value {
            Value::Str(span) => Some(span),
            _ => None,
        }
    }

    fn numeric_family(&self) -> Family {
        if self.schema.is_signed_int() {
            Family::Signed
        } else if self.schema.is_unsigned_int() {
            Family::Unsigned
        } else if self.schema.is_floating_point() {
            Family::Float
        } else {
            Family::None
        }
    }
}

enum Family {
    Signed,
    Unsigned,
    Float,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion() {
        assert_eq!(TypedValue::int64(-5).as_i64(), Some(-5));
        assert_eq!(TypedValue::int64(-5).as_f64(), Some(-5.0));
        assert_eq!(TypedValue::uint64(7).as_i64(), Some(7));
        assert_eq!(TypedValue::float64(2.5).as_i64(), Some(2));
        assert_eq!(TypedValue::float64(2.5).as_f64(), Some(2.5));
    }

    #[test]
    fn strings_are_not_numbers() {
        let v = TypedValue::str_span(StrSpan::from_static("two"));
        assert_eq!(v.as_i64(), None);
        assert_eq!(v.as_f64(), None);
        assert!(v.as_str_span().is_some());
        assert!(v.as_field_span().is_none());
    }

    #[test]
    fn barrier_is_marked() {
        assert!(TypedValue::frame_barrier().is_frame_barrier());
        assert!(!TypedValue::int64(0).is_frame_barrier());
    }
}
