use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::traits::TaskHandler;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler not found: {0}")]
    NotFound(String),
}

/// Registry mapping task ids to handler instances
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_id: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_id.into(), handler);
    }

    pub fn get(&self, task_id: &str) -> Result<Arc<dyn TaskHandler>, RegistryError> {
        self.handlers
            .get(task_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(task_id.to_string()))
    }

    pub fn has_handler(&self, task_id: &str) -> bool {
        self.handlers.contains_key(task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Task ids from `task_ids` that no handler is registered for
    ///
    /// Deliveries of these end up in the DLQ with `NO_HANDLER`.
    pub fn unhandled<'a>(&self, task_ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        task_ids
            .into_iter()
            .filter(|task_id| !self.has_handler(task_id))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{HandlerError, TaskContext};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn handle(&self, _ctx: &TaskContext) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry.register("downloads.cleanup_old_files", Arc::new(Noop));

        assert!(registry.has_handler("downloads.cleanup_old_files"));
        assert!(registry.get("downloads.cleanup_old_files").is_ok());
        assert!(matches!(
            registry.get("downloads.process_download"),
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(
            registry.task_ids().collect::<Vec<_>>(),
            vec!["downloads.cleanup_old_files"]
        );
    }

    #[test]
    fn test_unhandled_task_ids() {
        let mut registry = HandlerRegistry::new();
        registry.register("downloads.cleanup_old_files", Arc::new(Noop));

        let unhandled = registry.unhandled([
            "downloads.cleanup_old_files",
            "downloads.process_download",
        ]);
        assert_eq!(unhandled, vec!["downloads.process_download"]);
    }
}
