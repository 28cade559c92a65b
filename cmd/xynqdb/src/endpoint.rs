//! Per-connection REPL endpoint.
//!
//! One iteration = read one S-expression, compile, execute, write one JSON
//! value, purge the request arena. User program errors keep the connection
//! open; stream errors (or clean EOF) end it.

use xynq_base::{ScratchArena, StreamReader, StreamWriter};
use xynq_runtime::TaskContext;
use xynq_slang::ExecuteEnv;
use xynq_types::JsonSerializer;

use crate::deps::SharedDeps;
use crate::tcp::TcpStream;

const IO_BUF_SIZE: usize = 4096;

/// The connection handler installed by the server: serve the REPL until
/// the stream dies.
pub fn serve(tc: &TaskContext, name: &str, stream: &TcpStream<'_>) {
    tracing::info!(target: "xynq::endpoint", "start serving endpoint {}", name);

    let deps = tc.user_data::<SharedDeps>();
    let arena = ScratchArena::new();

    // Heap-allocated so the fiber stack stays small.
    let mut in_buf = vec![0u8; IO_BUF_SIZE];
    let mut out_buf = vec![0u8; IO_BUF_SIZE];
    let mut reader = StreamReader::new(&mut in_buf, stream);
    let mut writer = StreamWriter::new(&mut out_buf, stream);

    while reader.is_good() && writer.is_good() {
        let mut serializer = JsonSerializer::new(&mut writer);
        let exec_env = ExecuteEnv {
            env: &deps.env,
            arena: &arena,
            user_data: deps,
        };
        match xynq_slang::execute(&mut reader, &mut serializer, &exec_env) {
            Ok(true) => {}
            // Clean end of input: nothing more to serve.
            Ok(false) => break,
            // Compile error already went to the client; the connection
            // stays open.
            Err(_) => {}
        }
        arena.purge();
    }

    tracing::info!(target: "xynq::endpoint", "data stream closed, dropping endpoint {}", name);
}
