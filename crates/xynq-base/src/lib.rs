//! # xynq-base — allocation and byte-stream primitives
//!
//! The two building blocks everything else sits on:
//!
//! - [`ScratchArena`]: a bump-pointer allocator with bulk free at request
//!   boundaries. One per worker / connection / compile.
//! - [`StreamReader`] / [`StreamWriter`]: buffered byte I/O over the
//!   [`InStream`] / [`OutStream`] capabilities, so the same parsing code
//!   runs against a socket, a file or an in-memory buffer.

pub mod arena;
pub mod file;
pub mod stream;

pub use arena::{ScratchArena, StrSpan};
pub use file::FileInStream;
pub use stream::{
    DummyInStream, DummyOutStream, InStream, MemOutStream, OutStream, StreamError, StreamReader,
    StreamWriter,
};
