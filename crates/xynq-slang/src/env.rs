//! Call environment: the read-only tables the compiler resolves against.

use std::collections::HashMap;

use xynq_base::{ScratchArena, StreamReader};

use crate::call::CallFn;

/// Name → host function.
pub type FuncTable = HashMap<&'static str, CallFn>;

/// Payload token → handler.
pub type PayloadHandlerTable = HashMap<u32, Box<dyn PayloadHandler + Send + Sync>>;

/// Handler for `!tag[...]` payload blocks. Consumes the payload bytes from
/// the reader (everything up to the closing `]`).
pub trait PayloadHandler {
    fn process_payload(
        &self,
        reader: &mut StreamReader<'_>,
        arena: &ScratchArena,
    ) -> Result<(), String>;
}

/// Build the numeric token for a payload tag, e.g. `payload_token(b"json")`.
pub const fn payload_token(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | tag[3] as u32
}

/// Immutable after construction; shared by every connection.
pub struct Env {
    functions: FuncTable,
    payload_handlers: PayloadHandlerTable,
}

impl Env {
    pub fn new(functions: FuncTable, payload_handlers: PayloadHandlerTable) -> Self {
        Self {
            functions,
            payload_handlers,
        }
    }

    pub fn find_call(&self, name: &str) -> Option<CallFn> {
        self.functions.get(name).copied()
    }

    pub fn find_payload_handler(&self, token: u32) -> Option<&(dyn PayloadHandler + Send + Sync)> {
        self.payload_handlers.get(&token).map(|h| h.as_ref())
    }
}
