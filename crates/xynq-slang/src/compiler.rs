//! Compiler — a lexer handler that emits linear bytecode.
//!
//! Token callbacks append instructions in source order: `begin_op` emits
//! the `Call`, values emit `Push`es, `end_op` emits the frame barrier.
//! The instruction vector is then reversed: the VM executes in post-order,
//! so after reversal each barrier lands below its call's first argument
//! and arguments are pushed before the `Call` runs.

use xynq_base::{ScratchArena, StreamReader};
use xynq_types::TypedValue;

use crate::env::Env;
use crate::lexer::{self, HandlerResult, LexerHandler};
use crate::program::{Instruction, Program};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Error(ln {line}, col {col}): {msg}")]
    Syntax {
        line: usize,
        col: usize,
        msg: String,
    },
    #[error("IOError")]
    Io,
}

struct Compiler<'e, 'a> {
    env: &'e Env,
    arena: &'a ScratchArena,
    code: Vec<Instruction>,
}

impl LexerHandler for Compiler<'_, '_> {
    fn begin_op(&mut self, name: &str) -> HandlerResult {
        let Some(call) = self.env.find_call(name) else {
            return Err(format!("Unknown function '{}'", name));
        };
        self.code.push(Instruction::Call(call));
        Ok(())
    }

    fn end_op(&mut self) -> HandlerResult {
        self.code.push(Instruction::Push(TypedValue::frame_barrier()));
        Ok(())
    }

    fn str_value(&mut self, value: &str) -> HandlerResult {
        let span = self.arena.alloc_str(value);
        self.code.push(Instruction::Push(TypedValue::str_span(span)));
        Ok(())
    }

    fn int_value(&mut self, value: i64) -> HandlerResult {
        self.code.push(Instruction::Push(TypedValue::int64(value)));
        Ok(())
    }

    fn double_value(&mut self, value: f64) -> HandlerResult {
        self.code.push(Instruction::Push(TypedValue::float64(value)));
        Ok(())
    }

    fn unhandled_value(&mut self, value: &str) -> HandlerResult {
        if let Some(field_name) = value.strip_prefix(':') {
            if !field_name.is_empty() {
                let span = self.arena.alloc_str(field_name);
                self.code.push(Instruction::Push(TypedValue::field(span)));
                return Ok(());
            }
        }
        // Bare identifiers behave like strings.
        self.str_value(value)
    }

    fn custom_data(&mut self, token: u32, reader: &mut StreamReader<'_>) -> HandlerResult {
        let Some(handler) = self.env.find_payload_handler(token) else {
            return Err(format!("Unknown payload type: {}", token));
        };
        handler.process_payload(reader, self.arena)
    }
}

/// Compile one S-expression from `reader`. String literals are copied into
/// `arena` and must outlive the returned program.
///
/// Returns `Ok(None)` when the stream ended before any expression started
/// (clean end of input).
pub fn compile(
    env: &Env,
    reader: &mut StreamReader<'_>,
    arena: &ScratchArena,
) -> Result<Option<Program>, CompileError> {
    let mut compiler = Compiler {
        env,
        arena,
        code: Vec::new(),
    };

    match lexer::run(reader, &mut compiler, true) {
        Err(failure) => Err(CompileError::Syntax {
            line: failure.line,
            col: failure.col,
            msg: failure.msg,
        }),
        Ok(false) => {
            if reader.last_error() == Some(xynq_base::StreamError::Io) {
                Err(CompileError::Io)
            } else {
                Ok(None)
            }
        }
        Ok(true) => {
            compiler.code.reverse();
            Ok(Some(Program::new(compiler.code)))
        }
    }
}
