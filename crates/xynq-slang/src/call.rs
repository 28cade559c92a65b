//! Host-function call interface.
//!
//! A host function receives a [`CallContext`]: its arguments (a view into
//! the VM stack down to the frame barrier), an output writer backed by a
//! separate stack, and the embedder's opaque user data.

use std::any::Any;

use xynq_base::StrSpan;
use xynq_types::{TypeSchemaRef, TypedValue, Value};

/// Host function failure; the message goes to the client as a JSON string
/// and the program aborts.
#[derive(Debug)]
pub struct CallError(pub String);

impl From<String> for CallError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for CallError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

pub type CallFn = fn(&mut CallContext<'_>) -> Result<(), CallError>;

/// Arguments of one call: the VM stack from the barrier up.
#[derive(Clone, Copy)]
pub struct CallArgs<'a> {
    stack: &'a [TypedValue],
}

impl<'a> CallArgs<'a> {
    pub(crate) fn new(stack: &'a [TypedValue]) -> Self {
        Self { stack }
    }

    /// Iterator positioned at the first argument (source order).
    pub fn iter(&self) -> ArgIter<'a> {
        ArgIter {
            stack: self.stack,
            idx: self.stack.len(),
        }
    }
}

/// Walks the argument frame top-down; [`ArgIter::is_end`] is true at the
/// frame barrier.
#[derive(Clone, Copy)]
pub struct ArgIter<'a> {
    stack: &'a [TypedValue],
    idx: usize,
}

impl<'a> ArgIter<'a> {
    #[inline]
    pub fn is_end(&self) -> bool {
        self.idx == 0 || self.stack[self.idx - 1].is_frame_barrier()
    }

    /// Move to the next argument.
    #[inline]
    pub fn advance(&mut self) {
        debug_assert!(!self.is_end());
        self.idx -= 1;
    }

    #[inline]
    fn cur(&self) -> &TypedValue {
        debug_assert!(!self.is_end());
        &self.stack[self.idx - 1]
    }

    pub fn schema(&self) -> TypeSchemaRef {
        self.cur().schema
    }

    pub fn typed_value(&self) -> TypedValue {
        *self.cur()
    }

    pub fn value(&self) -> Value {
        self.cur().value
    }

    /// Checked getters: `None` on family mismatch, numeric coercion within
    /// the numeric families.
    pub fn get_i64(&self) -> Option<i64> {
        self.cur().as_i64()
    }

    pub fn get_u64(&self) -> Option<u64> {
        self.cur().as_u64()
    }

    pub fn get_f64(&self) -> Option<f64> {
        self.cur().as_f64()
    }

    pub fn get_str(&self) -> Option<StrSpan> {
        self.cur().as_str_span()
    }

    pub fn get_field(&self) -> Option<StrSpan> {
        self.cur().as_field_span()
    }
}

/// Where a host function writes its results. Backed by a stack separate
/// from the argument frame, so outputs never clobber arguments mid-call;
/// the VM splices the output in after the frame is purged.
pub struct CallOutput<'a> {
    stack: &'a mut Vec<TypedValue>,
}

impl<'a> CallOutput<'a> {
    pub(crate) fn new(stack: &'a mut Vec<TypedValue>) -> Self {
        Self { stack }
    }

    pub fn add_i64(&mut self, value: i64) {
        self.stack.push(TypedValue::int64(value));
    }

    pub fn add_u64(&mut self, value: u64) {
        self.stack.push(TypedValue::uint64(value));
    }

    pub fn add_f64(&mut self, value: f64) {
        self.stack.push(TypedValue::float64(value));
    }

    pub fn add_str(&mut self, span: StrSpan) {
        self.stack.push(TypedValue::str_span(span));
    }

    pub fn add_typed(&mut self, value: TypedValue) {
        self.stack.push(value);
    }

    pub fn add_object(&mut self, schema: TypeSchemaRef, data: *const u8) {
        self.stack.push(TypedValue::object(schema, data));
    }
}

/// Passed to every host function.
pub struct CallContext<'a> {
    pub args: CallArgs<'a>,
    pub output: CallOutput<'a>,
    pub(crate) user_data: &'a dyn Any,
}

impl<'a> CallContext<'a> {
    /// Typed access to the embedder's user data. Panics on a type
    /// mismatch — that is a wiring bug, not a runtime condition.
    ///
    /// The returned borrow is independent of the context, so arguments can
    /// keep being read and output written while it is held.
    pub fn user_data<T: Any>(&self) -> &'a T {
        self.user_data
            .downcast_ref::<T>()
            .expect("call user data has a different type")
    }
}
