//! Server assembly: turn a [`Config`] into a running pool.
//!
//! Shared between the binary and the integration tests (which bind an
//! ephemeral port and poke the counters).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;

use xynq_config::{Config, ConfigKeyError};
use xynq_runtime::{TaskManager, TaskManagerConfig, TaskTuple};
use xynq_storage::Storage;
use xynq_types::{TypeManager, TypeVault};

use crate::deps::{ServerCounters, SharedDeps};
use crate::endpoint;
use crate::exec_files;
use crate::slang_env;
use crate::tcp::{self, TcpKeepAlive, TcpParams};

/// Everything the server needs besides the pool itself.
pub struct ServerState {
    pub types: Arc<TypeManager>,
    pub storage: Arc<Storage>,
    pub counters: Arc<ServerCounters>,
    /// `(address, bound port)` per configured listener.
    pub listeners: Vec<(String, u16)>,
}

/// Build a ready-to-run task manager from the config: listeners bound,
/// entrypoints seeded, hooks installed.
pub fn build(config: &Config) -> anyhow::Result<(TaskManager, ServerState)> {
    let types = Arc::new(TypeManager::with_basic_types());
    let storage = Arc::new(Storage::new());
    let counters = Arc::new(ServerCounters::default());
    let env = Arc::new(slang_env::create_env());

    let mut manager = TaskManager::new(task_manager_config(config)?)
        .context("failed to create task manager")?;

    // Per-worker shared dependencies.
    {
        let (env, storage, counters, types) = (
            Arc::clone(&env),
            Arc::clone(&storage),
            Arc::clone(&counters),
            Arc::clone(&types),
        );
        manager.on_before_thread_start(move |_index| {
            Some(Box::new(SharedDeps {
                env: Arc::clone(&env),
                storage: Arc::clone(&storage),
                types: TypeVault::new(Arc::clone(&types)),
                counters: Arc::clone(&counters),
            }))
        });
    }

    // Listeners.
    let tcp_params = tcp_params(config)?;
    let binds = match config.get_str_list("tcp.bind") {
        Ok(list) => list.iter().map(|s| s.to_string()).collect(),
        Err(ConfigKeyError::DoesNotExist) => vec!["0.0.0.0:9920".to_string()],
        Err(ConfigKeyError::InvalidType) => {
            anyhow::bail!("tcp.bind must be a list of \"ip:port\" strings")
        }
    };

    let mut listeners = Vec::new();
    for bind in &binds {
        let (addr, port) = split_bind_addr(bind)
            .with_context(|| format!("invalid tcp.bind address '{}'", bind))?;
        let (fd, bound_port) = tcp::bind_listener(&addr, port, &tcp_params)
            .with_context(|| format!("failed to bind {}", bind))?;
        tracing::info!(target: "xynq::main", "listening on {}:{}", addr, bound_port);
        listeners.push((addr, bound_port));
        manager.add_entrypoint(TaskTuple::new("tcp-accept", move |tc| {
            tcp::accept_task(tc, fd, endpoint::serve)
        }));
    }

    // Startup exec files.
    match config.get_str_list("exec") {
        Ok(files) => {
            let files: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
            manager.add_entrypoint(TaskTuple::new("exec-files", move |tc| {
                exec_files::exec_files_task(tc, files)
            }));
        }
        Err(ConfigKeyError::DoesNotExist) => {}
        Err(ConfigKeyError::InvalidType) => anyhow::bail!("exec must be a list of file paths"),
    }

    Ok((
        manager,
        ServerState {
            types,
            storage,
            counters,
            listeners,
        },
    ))
}

fn task_manager_config(config: &Config) -> anyhow::Result<TaskManagerConfig> {
    let num_threads = match config.get_str("task.num-threads") {
        Ok("auto") => 0,
        Ok(other) => anyhow::bail!(
            "invalid number of threads in the config, must be 'auto' or a number (task.num-threads={})",
            other
        ),
        Err(ConfigKeyError::InvalidType) => {
            let n = config
                .get_i64("task.num-threads")
                .map_err(|_| anyhow::anyhow!("invalid task.num-threads"))?;
            if n < 1 {
                anyhow::bail!("invalid number of threads, must be >= 1 (task.num-threads={})", n);
            }
            n as usize
        }
        Err(ConfigKeyError::DoesNotExist) => 0,
    };

    let max_events = match config.get_i64("events.max-events-at-once") {
        Ok(n) if n > 0 => n as usize,
        Ok(n) => anyhow::bail!("invalid max-events-at-once limit ({})", n),
        Err(_) => 1024,
    };

    Ok(TaskManagerConfig {
        num_threads,
        max_events_at_once: max_events,
        pin_threads: config.get_bool("task.pin-threads").unwrap_or(true),
    })
}

fn tcp_params(config: &Config) -> anyhow::Result<TcpParams> {
    Ok(TcpParams {
        listen_backlog: config.get_i64("tcp.listen-backlog").unwrap_or(512) as i32,
        reuse_addr: config.get_bool("tcp.reuse-bind-addr").unwrap_or(false),
        keep_alive: TcpKeepAlive {
            enable: config.get_bool("tcp.keep-alive.enable").unwrap_or(false),
            idle_sec: config.get_i64("tcp.keep-alive.idle").unwrap_or(20) as i32,
            interval_sec: config.get_i64("tcp.keep-alive.interval").unwrap_or(20) as i32,
            num_probes: config.get_i64("tcp.keep-alive.probes").unwrap_or(8) as i32,
        },
    })
}

/// `"127.0.0.1:9920"` → `("127.0.0.1", 9920)`. The port separator is the
/// last colon, so IPv6 addresses work unbracketed.
fn split_bind_addr(bind: &str) -> anyhow::Result<(String, u16)> {
    let idx = bind
        .rfind(':')
        .ok_or_else(|| anyhow::anyhow!("missing ':port'"))?;
    let port: u16 = bind[idx + 1..].parse().context("invalid port")?;
    Ok((bind[..idx].to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_splitting() {
        assert_eq!(
            split_bind_addr("127.0.0.1:9920").unwrap(),
            ("127.0.0.1".to_string(), 9920)
        );
        assert_eq!(split_bind_addr("::1:15001").unwrap(), ("::1".to_string(), 15001));
        assert!(split_bind_addr("nope").is_err());
    }
}
