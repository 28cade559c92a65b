//! Startup exec files: slang scripts run before the server takes traffic.

use std::path::PathBuf;

use xynq_base::{FileInStream, ScratchArena, StreamReader};
use xynq_runtime::TaskContext;
use xynq_slang::ExecuteEnv;
use xynq_types::DummySerializer;

use crate::deps::SharedDeps;

/// Entrypoint task body: execute every expression of every listed file.
/// A missing file stops the pool (startup is misconfigured).
pub fn exec_files_task(tc: &TaskContext, files: Vec<PathBuf>) {
    let deps = tc.user_data::<SharedDeps>();
    let arena = ScratchArena::new();

    for path in &files {
        let stream = match FileInStream::open(path) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    target: "xynq::exec",
                    "cannot read exec file '{}': {}",
                    path.display(), e
                );
                tc.exit();
                return;
            }
        };

        tracing::info!(target: "xynq::exec", "executing '{}'", path.display());
        let mut buf = vec![0u8; 512];
        let mut reader = StreamReader::new(&mut buf, &stream);
        let mut serializer = DummySerializer;

        loop {
            let exec_env = ExecuteEnv {
                env: &deps.env,
                arena: &arena,
                user_data: deps,
            };
            match xynq_slang::execute(&mut reader, &mut serializer, &exec_env) {
                Ok(true) => arena.purge(),
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(
                        target: "xynq::exec",
                        "error in exec file '{}': {}",
                        path.display(), e
                    );
                    break;
                }
            }
        }
    }
}
