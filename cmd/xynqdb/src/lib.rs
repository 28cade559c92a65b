//! # xynqdb — the server assembly
//!
//! Wires the runtime, the language and the store together: TCP accept
//! tasks feed per-connection REPL endpoints; host functions operate on the
//! typed object store through per-worker shared dependencies.
//!
//! The binary (`main.rs`) is a thin CLI over [`server`]; integration
//! tests assemble the same pieces against an ephemeral port.

pub mod deps;
pub mod endpoint;
pub mod exec_files;
pub mod payload;
pub mod server;
pub mod signal;
pub mod slang_env;
pub mod tcp;
