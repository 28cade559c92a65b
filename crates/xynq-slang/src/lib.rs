//! # xynq-slang — the command language
//!
//! Prefix S-expressions in, JSON out:
//!
//! ```text
//! (+ (- 3 4) 5)       ; => 4
//! (create "Point" :x 10 :y 2.5)
//! ```
//!
//! Pipeline: a streaming [`lexer`] drives the [`compiler`] (a lexer
//! handler) into a linear [`program`](Program), which the stack VM
//! executes against the host-function [`Env`].

pub mod call;
pub mod compiler;
pub mod env;
pub mod lexer;
pub mod program;

pub use call::{ArgIter, CallArgs, CallContext, CallError, CallFn, CallOutput};
pub use compiler::{compile, CompileError};
pub use env::{payload_token, Env, FuncTable, PayloadHandler, PayloadHandlerTable};
pub use lexer::{LexerFailure, LexerHandler};
pub use program::{Instruction, Program};

use std::any::Any;

use xynq_base::{ScratchArena, StreamReader};
use xynq_types::Serializer;

/// Everything one program execution needs from its surroundings.
pub struct ExecuteEnv<'a> {
    pub env: &'a Env,
    pub arena: &'a ScratchArena,
    pub user_data: &'a dyn Any,
}

/// Read one S-expression from `reader`, compile and run it, writing the
/// result (or diagnostic) through `serializer`.
///
/// Returns `Ok(true)` when an expression ran, `Ok(false)` when the stream
/// ended before any expression started (clean end of input — nothing is
/// written), and `Err` for compile failures (already serialized as a JSON
/// string before returning).
pub fn execute(
    reader: &mut StreamReader<'_>,
    serializer: &mut dyn Serializer,
    exec_env: &ExecuteEnv<'_>,
) -> Result<bool, CompileError> {
    match compile(exec_env.env, reader, exec_env.arena) {
        Ok(Some(program)) => {
            let mut ctx = program::ExecuteContext {
                serializer,
                user_data: exec_env.user_data,
            };
            program.execute(&mut ctx);
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(error) => {
            let _ = serializer.serialize_str(&error.to_string());
            Err(error)
        }
    }
}

/// Convenience for executing in-memory code (tests, startup scripts).
pub fn execute_str(
    code: &str,
    serializer: &mut dyn Serializer,
    exec_env: &ExecuteEnv<'_>,
) -> Result<bool, CompileError> {
    let mut buf = code.as_bytes().to_vec();
    let stream = xynq_base::DummyInStream;
    let mut reader = StreamReader::with_available(&mut buf, &stream, code.len());
    execute(&mut reader, serializer, exec_env)
}
