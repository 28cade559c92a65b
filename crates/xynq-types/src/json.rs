//! JSON output.
//!
//! One JSON value per program, terminated by `\n` and flushed. A single
//! residual value is emitted bare, zero or several values as an array,
//! errors as a bare JSON string. Object values walk their schema's fields
//! in declared order.

use std::fmt::Write as _;

use xynq_base::{StreamError, StreamWriter};

use crate::schema::TypeSchemaRef;
use crate::value::{TypedValue, Value};

pub type SerializeResult = Result<(), StreamError>;

/// Output serializer capability handed to the VM.
pub trait Serializer {
    /// Serialize a single value.
    fn serialize_value(&mut self, value: TypedValue) -> SerializeResult;

    /// Serialize the residual value list of a program.
    fn serialize_values(&mut self, values: &[TypedValue]) -> SerializeResult;

    /// Serialize a diagnostic string (program errors).
    fn serialize_str(&mut self, s: &str) -> SerializeResult;
}

/// Serializer that swallows all output. Used by tests and startup exec
/// files.
pub struct DummySerializer;

impl Serializer for DummySerializer {
    fn serialize_value(&mut self, _value: TypedValue) -> SerializeResult {
        Ok(())
    }

    fn serialize_values(&mut self, _values: &[TypedValue]) -> SerializeResult {
        Ok(())
    }

    fn serialize_str(&mut self, _s: &str) -> SerializeResult {
        Ok(())
    }
}

pub struct JsonSerializer<'w, 'b> {
    writer: &'w mut StreamWriter<'b>,
}

impl<'w, 'b> JsonSerializer<'w, 'b> {
    pub fn new(writer: &'w mut StreamWriter<'b>) -> Self {
        Self { writer }
    }

    fn finalize(&mut self) -> SerializeResult {
        let _ = self.writer.write_bytes(b"\n");
        let _ = self.writer.flush();
        match self.writer.last_error() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn write_one(&mut self, value: TypedValue) {
        if value.schema.is_basic() {
            self.write_basic(value);
        } else {
            match value.value {
                Value::Ptr(data) => self.write_object(data, value.schema),
                // A composite schema with no pointer payload is a bug in
                // whoever built the value.
                _ => debug_assert!(false, "composite value without object payload"),
            }
        }
    }

    fn write_basic(&mut self, value: TypedValue) {
        if value.schema.is_unsigned_int() {
            if let Value::U64(v) = value.value {
                let _ = write!(self.writer, "{}", v);
            }
        } else if value.schema.is_signed_int() {
            if let Value::I64(v) = value.value {
                let _ = write!(self.writer, "{}", v);
            }
        } else if value.schema.is_floating_point() {
            if let Value::F64(v) = value.value {
                self.write_float(v);
            }
        } else if value.schema.is_str() {
            if let Value::Str(span) = value.value {
                // Spans produced by the compiler are alive for the request.
                self.write_escaped(unsafe { span.as_str() });
            }
        } else {
            debug_assert!(false, "unserializable basic value: {}", value.schema.name);
        }
    }

    fn write_float(&mut self, v: f64) {
        // Round-trip precision; exponent form for magnitudes where the
        // plain rendering would degenerate.
        if v.is_finite() && v != 0.0 && (v.abs() < 1e-6 || v.abs() >= 1e21) {
            let _ = write!(self.writer, "{:e}", v);
        } else {
            let _ = write!(self.writer, "{}", v);
        }
    }

    fn write_object(&mut self, data: *const u8, schema: TypeSchemaRef) {
        debug_assert_eq!(data as usize % schema.alignment.max(1), 0);

        let _ = self.writer.write_bytes(b"{");
        let mut first = true;
        for field in &schema.fields {
            if !first {
                let _ = self.writer.write_bytes(b", ");
            }
            first = false;
            let _ = self.writer.write_bytes(b"\"");
            let _ = self.writer.write_str_bytes(field.name);
            let _ = self.writer.write_bytes(b"\":");

            let field_ptr = unsafe { data.add(field.offset) };
            if field.schema.is_basic() {
                self.write_basic_raw(field.schema, field_ptr);
            } else {
                self.write_object(field_ptr, field.schema);
            }
        }
        let _ = self.writer.write_bytes(b"}");
    }

    /// Read a basic value out of object storage and render it.
    fn write_basic_raw(&mut self, schema: TypeSchemaRef, data: *const u8) {
        unsafe {
            if schema.is_floating_point() {
                let v = match schema.size {
                    4 => f64::from((data as *const f32).read()),
                    8 => (data as *const f64).read(),
                    _ => {
                        debug_assert!(false, "bad float size {}", schema.size);
                        0.0
                    }
                };
                self.write_float(v);
            } else if schema.is_unsigned_int() {
                let v = match schema.size {
                    1 => u64::from(data.read()),
                    2 => u64::from((data as *const u16).read()),
                    4 => u64::from((data as *const u32).read()),
                    8 => (data as *const u64).read(),
                    _ => {
                        debug_assert!(false, "bad int size {}", schema.size);
                        0
                    }
                };
                let _ = write!(self.writer, "{}", v);
            } else {
                let v = match schema.size {
                    1 => i64::from((data as *const i8).read()),
                    2 => i64::from((data as *const i16).read()),
                    4 => i64::from((data as *const i32).read()),
                    8 => (data as *const i64).read(),
                    _ => {
                        debug_assert!(false, "bad int size {}", schema.size);
                        0
                    }
                };
                let _ = write!(self.writer, "{}", v);
            }
        }
    }

    fn write_escaped(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let _ = self.writer.write_bytes(b"\"");
        let mut prev = 0;
        for (i, &b) in bytes.iter().enumerate() {
            let escape: Option<&[u8]> = match b {
                b'"' => Some(b"\\\""),
                b'\\' => Some(b"\\\\"),
                0x08 => Some(b"\\b"),
                b'\t' => Some(b"\\t"),
                b'\n' => Some(b"\\n"),
                0x0C => Some(b"\\f"),
                b'\r' => Some(b"\\r"),
                _ => None,
            };
            if let Some(esc) = escape {
                let _ = self.writer.write_bytes(&bytes[prev..i]);
                let _ = self.writer.write_bytes(esc);
                prev = i + 1;
            } else if b < 0x20 {
                let _ = self.writer.write_bytes(&bytes[prev..i]);
                let _ = write!(self.writer, "\\u{:04x}", b);
                prev = i + 1;
            }
        }
        let _ = self.writer.write_bytes(&bytes[prev..]);
        let _ = self.writer.write_bytes(b"\"");
    }
}

impl Serializer for JsonSerializer<'_, '_> {
    fn serialize_value(&mut self, value: TypedValue) -> SerializeResult {
        self.write_one(value);
        self.finalize()
    }

    fn serialize_values(&mut self, values: &[TypedValue]) -> SerializeResult {
        if values.len() == 1 {
            self.write_one(values[0]);
            return self.finalize();
        }
        let _ = self.writer.write_bytes(b"[");
        for (i, value) in values.iter().enumerate() {
            if i != 0 {
                let _ = self.writer.write_bytes(b", ");
            }
            self.write_one(*value);
        }
        let _ = self.writer.write_bytes(b"]");
        self.finalize()
    }

    fn serialize_str(&mut self, s: &str) -> SerializeResult {
        self.write_escaped(s);
        self.finalize()
    }
}
