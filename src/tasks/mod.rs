//! Task handlers executed by the worker pool
//!
//! ## Key Components
//!
//! - [`TaskHandler`] - Trait implemented per task id
//! - [`HandlerRegistry`] - task id → handler lookup used by workers
//! - [`CleanupHandler`], [`CacheSweepHandler`], [`DependencyUpdateHandler`] -
//!   handlers behind the built-in periodic jobs
//!
//! Download processing and thumbnail generation belong to the embedding
//! application, which registers its own handlers for those task ids.

mod builtin;
mod registry;
mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use builtin::{CacheSweepHandler, CleanupHandler, DependencyUpdateHandler};
pub use registry::{HandlerRegistry, RegistryError};
pub use traits::{HandlerError, TaskContext, TaskHandler};

use crate::cache::MemoryCache;
use crate::scheduler::routes::{CLEANUP_OLD_FILES, CLEAR_EXPIRED_CACHE, UPDATE_DEPENDENCIES};
use crate::store::StatusLog;

/// Registry with the maintenance handlers wired to their task ids
pub fn builtin_registry(
    status_log: StatusLog,
    cache: MemoryCache,
    status_retention: Duration,
    dependency_update_command: Vec<String>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(
        CLEANUP_OLD_FILES,
        Arc::new(CleanupHandler::new(status_log, status_retention)),
    );
    registry.register(CLEAR_EXPIRED_CACHE, Arc::new(CacheSweepHandler::new(cache)));
    registry.register(
        UPDATE_DEPENDENCIES,
        Arc::new(DependencyUpdateHandler::new(dependency_update_command)),
    );
    registry
}
