//! The hosted function table.
//!
//! Arithmetic is numeric-homogeneous: any float argument switches the
//! whole operation to doubles, otherwise it runs in wrapping i64.
//! `defstruct`, `create` and `select` operate on the typed object store
//! through the per-worker [`SharedDeps`].

use std::sync::atomic::Ordering;

use xynq_slang::{
    payload_token, ArgIter, CallContext, CallError, CallFn, Env, FuncTable, PayloadHandlerTable,
};
use xynq_storage::ObjectWriter;
use xynq_types::TypedValue;

use crate::deps::SharedDeps;
use crate::payload::JsonPayloadHandler;

const INVALID_TYPE_ERROR: &str = "Operation expects numeric type";

pub fn create_env() -> Env {
    let mut functions = FuncTable::new();

    functions.insert("+", call_add as CallFn);
    functions.insert("-", call_sub as CallFn);
    functions.insert("*", call_mul as CallFn);
    functions.insert("/", call_div as CallFn);
    functions.insert("list", call_list as CallFn);
    functions.insert("nop", call_nop as CallFn);
    functions.insert("defstruct", call_defstruct as CallFn);
    functions.insert("create", call_create as CallFn);
    functions.insert("select", call_select as CallFn);

    let mut payload_handlers = PayloadHandlerTable::new();
    payload_handlers.insert(0, Box::new(JsonPayloadHandler)); // default
    payload_handlers.insert(payload_token(b"json"), Box::new(JsonPayloadHandler));

    Env::new(functions, payload_handlers)
}

enum MathOp {
    Invalid,
    SignedInt,
    Double,
}

/// All arguments must be numeric; floats contaminate.
fn check_operation_type(args: &xynq_slang::CallArgs<'_>) -> MathOp {
    let mut is_float = false;
    let mut it = args.iter();
    while !it.is_end() && it.schema().is_numeric() {
        is_float = is_float || it.schema().is_floating_point();
        it.advance();
    }
    if !it.is_end() {
        return MathOp::Invalid;
    }
    if is_float {
        MathOp::Double
    } else {
        MathOp::SignedInt
    }
}

fn fold_i64(mut it: ArgIter<'_>, init: i64, f: impl Fn(i64, i64) -> i64) -> i64 {
    let mut acc = init;
    while !it.is_end() {
        acc = f(acc, it.get_i64().unwrap_or(0));
        it.advance();
    }
    acc
}

fn fold_f64(mut it: ArgIter<'_>, init: f64, f: impl Fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    while !it.is_end() {
        acc = f(acc, it.get_f64().unwrap_or(0.0));
        it.advance();
    }
    acc
}

fn call_add(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    match check_operation_type(&cc.args) {
        MathOp::Invalid => Err(INVALID_TYPE_ERROR.into()),
        MathOp::Double => {
            let v = fold_f64(cc.args.iter(), 0.0, |a, b| a + b);
            cc.output.add_f64(v);
            Ok(())
        }
        MathOp::SignedInt => {
            let v = fold_i64(cc.args.iter(), 0, |a, b| a.wrapping_add(b));
            cc.output.add_i64(v);
            Ok(())
        }
    }
}

fn call_sub(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    match check_operation_type(&cc.args) {
        MathOp::Invalid => Err(INVALID_TYPE_ERROR.into()),
        MathOp::Double => {
            let mut it = cc.args.iter();
            let mut result = 0.0;
            if !it.is_end() {
                result = it.get_f64().unwrap_or(0.0);
                it.advance();
                result = fold_f64(it, result, |a, b| a - b);
            }
            cc.output.add_f64(result);
            Ok(())
        }
        MathOp::SignedInt => {
            let mut it = cc.args.iter();
            let mut result = 0;
            if !it.is_end() {
                result = it.get_i64().unwrap_or(0);
                it.advance();
                result = fold_i64(it, result, |a, b| a.wrapping_sub(b));
            }
            cc.output.add_i64(result);
            Ok(())
        }
    }
}

fn call_mul(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    match check_operation_type(&cc.args) {
        MathOp::Invalid => Err(INVALID_TYPE_ERROR.into()),
        MathOp::Double => {
            let v = fold_f64(cc.args.iter(), 1.0, |a, b| a * b);
            cc.output.add_f64(v);
            Ok(())
        }
        MathOp::SignedInt => {
            let v = fold_i64(cc.args.iter(), 1, |a, b| a.wrapping_mul(b));
            cc.output.add_i64(v);
            Ok(())
        }
    }
}

/// Division always runs in doubles: `(/ x)` is the reciprocal, more
/// arguments divide by their product.
fn call_div(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    if matches!(check_operation_type(&cc.args), MathOp::Invalid) {
        return Err(INVALID_TYPE_ERROR.into());
    }
    let mut it = cc.args.iter();
    if it.is_end() {
        cc.output.add_f64(f64::NAN);
        return Ok(());
    }
    let first = it.get_f64().unwrap_or(0.0);
    it.advance();
    if it.is_end() {
        cc.output.add_f64(1.0 / first);
        return Ok(());
    }
    let divisor = fold_f64(it, 1.0, |a, b| a * b);
    cc.output.add_f64(first / divisor);
    Ok(())
}

/// Identity: propagates its arguments unchanged.
fn call_list(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    let mut it = cc.args.iter();
    while !it.is_end() {
        let value = it.typed_value();
        cc.output.add_typed(value);
        it.advance();
    }
    Ok(())
}

/// Consumes its arguments, returns nothing, bumps the probe counter.
fn call_nop(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    let mut it = cc.args.iter();
    while !it.is_end() {
        it.advance();
    }
    cc.user_data::<SharedDeps>()
        .counters
        .nop_count
        .fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// `(defstruct "Name" :field "type" ...)` — register a new composite
/// schema.
fn call_defstruct(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    let deps = cc.user_data::<SharedDeps>();
    let mut it = cc.args.iter();

    if it.is_end() {
        return Err("Expected type name.".into());
    }
    let Some(type_name) = it.get_str() else {
        return Err("Expected type name.".into());
    };
    let type_name = unsafe { type_name.as_str() }.to_string();
    if deps.types.has_type(&type_name) {
        return Err(format!("Type '{}' already exists.", type_name).into());
    }
    it.advance();

    let mut fields = Vec::new();
    while !it.is_end() {
        let Some(field_name) = it.get_field() else {
            return Err(format!(
                "Expected field name but got '{}'",
                it.schema().name
            )
            .into());
        };
        let field_name = unsafe { field_name.as_str() }.to_string();
        it.advance();

        if it.is_end() {
            return Err(format!("Expected type name for field '{}'", field_name).into());
        }
        let Some(field_type_name) = it.get_str() else {
            return Err(format!("Expected type name, but got '{}'", it.schema().name).into());
        };
        let field_type_name = unsafe { field_type_name.as_str() };
        let Some(field_schema) = deps.types.find_schema(field_type_name) else {
            return Err(format!("Unknown type name '{}'", field_type_name).into());
        };
        it.advance();

        fields.push((field_name, field_schema));
    }

    deps.types
        .create_schema(&type_name, fields)
        .map_err(|e| CallError(e.to_string()))?;
    Ok(())
}

/// `(create "Type" :field value ...)` — create an object, set its fields,
/// return it.
fn call_create(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    let deps = cc.user_data::<SharedDeps>();
    let mut it = cc.args.iter();

    if it.is_end() {
        return Err("Not enough arguments for a function. Expected (create type_name [fields]).".into());
    }
    let Some(type_name) = it.get_str() else {
        return Err("Expected a type name.".into());
    };
    let type_name = unsafe { type_name.as_str() }.to_string();
    it.advance();

    deps.storage.ensure_vault_with_type(&deps.types, &type_name);
    let (handle, schema) = deps
        .storage
        .create_object(&type_name)
        .map_err(|e| CallError(format!("Failed to create new object of type '{}': {}", type_name, e)))?;
    let object = unsafe { &*handle };

    while !it.is_end() {
        let Some(field_name) = it.get_field() else {
            return Err(format!("Expected field name for type '{}'", type_name).into());
        };
        let field_name = unsafe { field_name.as_str() }.to_string();
        it.advance();

        if it.is_end() {
            return Err(format!("Expected value for field '{}'", field_name).into());
        }
        let value: TypedValue = it.typed_value();

        let mut writer = ObjectWriter::new(object);
        writer
            .write_typed(&field_name, value)
            .map_err(|e| CallError(format!("Failed to write a field: '{}': {}", field_name, e)))?;
        it.advance();
    }

    cc.output.add_object(schema, object.data());
    Ok(())
}

/// `(select "Type")` — every stored object of the type.
fn call_select(cc: &mut CallContext<'_>) -> Result<(), CallError> {
    let mut it = cc.args.iter();
    let Some(type_name) = (!it.is_end()).then(|| it.get_str()).flatten() else {
        return Err("Expected type name.".into());
    };
    let type_name = unsafe { type_name.as_str() }.to_string();

    let deps = cc.user_data::<SharedDeps>();
    let mut results = Vec::new();
    deps.storage.enumerate(&type_name, |object, schema| {
        results.push(TypedValue::object(schema, object.data()));
    });
    for value in results {
        cc.output.add_typed(value);
    }
    Ok(())
}
