//! Compiled programs and the stack VM.

use std::any::Any;

use xynq_types::{Serializer, TypedValue};

use crate::call::{CallArgs, CallContext, CallFn, CallOutput};

#[derive(Debug)]
pub enum Instruction {
    /// Push a value onto the stack.
    Push(TypedValue),
    /// Call a host function over the current frame.
    Call(CallFn),
}

pub struct ExecuteContext<'a> {
    pub serializer: &'a mut dyn Serializer,
    pub user_data: &'a dyn Any,
}

/// Immutable compiled program.
#[derive(Debug)]
pub struct Program {
    code: Vec<Instruction>,
}

impl Program {
    pub(crate) fn new(code: Vec<Instruction>) -> Self {
        Self { code }
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Run to completion. A failing host function aborts the program with
    /// its error text serialized; otherwise the residual stack is
    /// serialized as the result.
    pub fn execute(&self, ctx: &mut ExecuteContext<'_>) {
        let mut stack: Vec<TypedValue> = Vec::new();

        for instruction in &self.code {
            match instruction {
                Instruction::Push(value) => stack.push(*value),

                Instruction::Call(call) => {
                    let mut output_stack: Vec<TypedValue> = Vec::new();
                    let result = {
                        let mut call_context = CallContext {
                            args: CallArgs::new(&stack),
                            output: CallOutput::new(&mut output_stack),
                            user_data: ctx.user_data,
                        };
                        call(&mut call_context)
                    };

                    if let Err(error) = result {
                        let _ = ctx.serializer.serialize_str(&error.0);
                        return;
                    }

                    purge_stack_frame(&mut stack);
                    // The function's results become the enclosing frame's
                    // arguments.
                    stack.append(&mut output_stack);
                }
            }
        }

        if let Err(e) = ctx.serializer.serialize_values(&stack) {
            // A serializer failure means the underlying stream died; the
            // connection loop observes it via is_good.
            tracing::debug!(target: "xynq::slang", "failed to serialize program result: {}", e);
        }
    }
}

/// Pop everything down to and including the innermost frame barrier.
fn purge_stack_frame(stack: &mut Vec<TypedValue>) {
    let mut i = stack.len();
    while i > 0 {
        i -= 1;
        if stack[i].is_frame_barrier() {
            stack.truncate(i);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallError;
    use crate::env::{Env, FuncTable, PayloadHandlerTable};
    use crate::{execute_str, ExecuteEnv};
    use std::sync::atomic::{AtomicU64, Ordering};
    use xynq_base::ScratchArena;
    use xynq_types::DummySerializer;

    struct TestUserData {
        nop_count: AtomicU64,
    }

    fn call_nop(cc: &mut CallContext<'_>) -> Result<(), CallError> {
        let mut it = cc.args.iter();
        while !it.is_end() {
            it.advance();
        }
        cc.user_data::<TestUserData>()
            .nop_count
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn call_sum(cc: &mut CallContext<'_>) -> Result<(), CallError> {
        let mut sum: i64 = 0;
        let mut it = cc.args.iter();
        while !it.is_end() {
            let v = it.get_i64().ok_or("Operation expects numeric type")?;
            sum = sum.wrapping_add(v);
            it.advance();
        }
        cc.output.add_i64(sum);
        Ok(())
    }

    fn call_sub(cc: &mut CallContext<'_>) -> Result<(), CallError> {
        let mut it = cc.args.iter();
        let mut result: i64 = 0;
        if !it.is_end() {
            result = it.get_i64().ok_or("Operation expects numeric type")?;
            it.advance();
            while !it.is_end() {
                let v = it.get_i64().ok_or("Operation expects numeric type")?;
                result = result.wrapping_sub(v);
                it.advance();
            }
        }
        cc.output.add_i64(result);
        Ok(())
    }

    fn test_env() -> Env {
        let mut functions = FuncTable::new();
        functions.insert("nop", call_nop as CallFn);
        functions.insert("+", call_sum as CallFn);
        functions.insert("-", call_sub as CallFn);
        Env::new(functions, PayloadHandlerTable::new())
    }

    fn run_with_probe(code: &str) -> (Result<bool, crate::CompileError>, u64) {
        let env = test_env();
        let arena = ScratchArena::new();
        let user_data = TestUserData {
            nop_count: AtomicU64::new(0),
        };
        let exec_env = ExecuteEnv {
            env: &env,
            arena: &arena,
            user_data: &user_data,
        };
        let mut serializer = DummySerializer;
        let result = execute_str(code, &mut serializer, &exec_env);
        (result, user_data.nop_count.load(Ordering::Relaxed))
    }

    /// Serializer capturing the residual stack for assertions.
    #[derive(Default)]
    struct CaptureSerializer {
        values: Vec<TypedValue>,
        error: Option<String>,
    }

    impl Serializer for CaptureSerializer {
        fn serialize_value(&mut self, value: TypedValue) -> xynq_types::SerializeResult {
            self.values.push(value);
            Ok(())
        }
        fn serialize_values(&mut self, values: &[TypedValue]) -> xynq_types::SerializeResult {
            self.values.extend_from_slice(values);
            Ok(())
        }
        fn serialize_str(&mut self, s: &str) -> xynq_types::SerializeResult {
            self.error = Some(s.to_string());
            Ok(())
        }
    }

    fn run_capturing(code: &str) -> CaptureSerializer {
        let env = test_env();
        let arena = ScratchArena::new();
        let user_data = ();
        let exec_env = ExecuteEnv {
            env: &env,
            arena: &arena,
            user_data: &user_data,
        };
        let mut serializer = CaptureSerializer::default();
        let _ = execute_str(code, &mut serializer, &exec_env);
        serializer
    }

    #[test]
    fn unknown_function_reports_error() {
        let (result, _) = run_with_probe("(xxx)");
        assert!(result.is_err());
    }

    #[test]
    fn nested_nops_all_run() {
        let (result, nops) =
            run_with_probe("(nop (nop (nop) (nop) (nop (nop (nop)))) (nop) (nop (nop    )))");
        assert!(result.is_ok());
        assert_eq!(nops, 10);
    }

    #[test]
    fn sum_wraps_like_twos_complement() {
        let out = run_capturing("(+ 100 -1000 900 -9223372036854775808 9223372036854775807 25)");
        assert!(out.error.is_none());
        assert_eq!(out.values.len(), 1);
        assert_eq!(out.values[0].as_i64(), Some(24));
    }

    #[test]
    fn nested_calls_feed_outer_frames() {
        let out = run_capturing("(+ (- 3 4) 5)");
        assert!(out.error.is_none());
        assert_eq!(out.values.len(), 1);
        assert_eq!(out.values[0].as_i64(), Some(4));
    }

    #[test]
    fn sub_takes_first_argument_first() {
        let out = run_capturing("(- 10 1 2)");
        assert_eq!(out.values[0].as_i64(), Some(7));
    }

    #[test]
    fn host_error_aborts_program() {
        let out = run_capturing("(+ 1 \"two\")");
        assert_eq!(out.error.as_deref(), Some("Operation expects numeric type"));
        assert!(out.values.is_empty());
    }

    #[test]
    fn call_frame_discipline() {
        // After the inner call, the outer frame sees exactly the inner
        // output appended; the final stack holds one residual value.
        let out = run_capturing("(+ (+ 1 2) (+ 3 4))");
        assert_eq!(out.values.len(), 1);
        assert_eq!(out.values[0].as_i64(), Some(10));
    }
}
