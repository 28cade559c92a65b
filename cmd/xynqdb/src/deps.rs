//! Per-worker shared dependencies.
//!
//! Built by the `before_thread_start` hook and carried as the task
//! manager's per-worker user data; host functions reach them through the
//! call context.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use xynq_slang::Env;
use xynq_storage::Storage;
use xynq_types::TypeVault;

/// Process-wide counters. `nop_count` is the out-of-band probe tests use.
#[derive(Default)]
pub struct ServerCounters {
    pub nop_count: AtomicU64,
}

/// What every worker (and through it, every request) can reach.
pub struct SharedDeps {
    pub env: Arc<Env>,
    pub storage: Arc<Storage>,
    pub types: TypeVault,
    pub counters: Arc<ServerCounters>,
}
