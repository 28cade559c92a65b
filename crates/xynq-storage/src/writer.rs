//! Typed field writes into object payloads.

use xynq_types::{TypeSchemaRef, TypedValue};

use crate::object::Object;

/// Writes field values into one object, coercing numerics to the field's
/// declared type.
pub struct ObjectWriter<'a> {
    object: &'a Object,
}

impl<'a> ObjectWriter<'a> {
    pub fn new(object: &'a Object) -> Self {
        Self { object }
    }

    /// Write `value` into the named field. Fails for unknown fields,
    /// non-basic field types, and non-numeric values aimed at numeric
    /// fields.
    pub fn write_typed(&mut self, field_name: &str, value: TypedValue) -> Result<(), String> {
        let schema = self.object.schema();
        let field = schema
            .fields
            .iter()
            .find(|f| f.name == field_name)
            .ok_or_else(|| "Field does not exist".to_string())?;

        if !field.schema.is_basic() {
            return Err("Unsupported type".to_string());
        }

        let dst = unsafe { self.object.data_mut().add(field.offset) };
        write_basic_value(value, field.schema, dst)
    }
}

fn write_basic_value(
    value: TypedValue,
    dst_type: TypeSchemaRef,
    dst: *mut u8,
) -> Result<(), String> {
    if dst_type.is_floating_point() {
        let v = value
            .as_f64()
            .ok_or_else(|| "Unsupported value type".to_string())?;
        unsafe {
            match dst_type.size {
                4 => (dst as *mut f32).write(v as f32),
                8 => (dst as *mut f64).write(v),
                _ => return Err("Unsupported type".to_string()),
            }
        }
    } else {
        // Integral target: floats truncate, signed values bit-carry.
        let v = value
            .as_u64()
            .ok_or_else(|| "Unsupported value type".to_string())?;
        unsafe {
            match dst_type.size {
                1 => dst.write(v as u8),
                2 => (dst as *mut u16).write(v as u16),
                4 => (dst as *mut u32).write(v as u32),
                8 => (dst as *mut u64).write(v),
                _ => return Err("Unsupported type".to_string()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::ObjectVault;
    use std::sync::Arc;
    use xynq_types::vault::TypeManager;
    use xynq_types::TypeSchemaRef;

    fn point_schema() -> TypeSchemaRef {
        let manager = Arc::new(TypeManager::with_basic_types());
        let types = xynq_types::TypeVault::new(Arc::clone(&manager));
        types
            .create_schema(
                "WriterPoint",
                vec![
                    ("x".to_string(), &xynq_types::schema::INT64 as TypeSchemaRef),
                    ("y".to_string(), &xynq_types::schema::FLOAT64),
                    ("flag".to_string(), &xynq_types::schema::UINT8),
                ],
            )
            .unwrap()
    }

    #[test]
    fn writes_and_coerces_fields() {
        let vault = ObjectVault::new(point_schema());
        let handle = vault.create_object();
        let object = unsafe { &*handle };

        let mut writer = ObjectWriter::new(object);
        writer.write_typed("x", TypedValue::int64(-7)).unwrap();
        writer.write_typed("y", TypedValue::int64(3)).unwrap(); // int → float
        writer.write_typed("flag", TypedValue::float64(1.9)).unwrap(); // float → int

        unsafe {
            let base = object.data();
            assert_eq!((base as *const i64).read(), -7);
            assert_eq!((base.add(8) as *const f64).read(), 3.0);
            assert_eq!(base.add(16).read(), 1);
        }
    }

    #[test]
    fn bad_fields_and_values_fail() {
        let vault = ObjectVault::new(point_schema());
        let object = unsafe { &*vault.create_object() };
        let mut writer = ObjectWriter::new(object);

        assert!(writer.write_typed("nope", TypedValue::int64(1)).is_err());
        let text = TypedValue::str_span(xynq_types::StrSpan::from_static("three"));
        assert!(writer.write_typed("x", text).is_err());
    }
}
