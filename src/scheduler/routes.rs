use std::collections::{BTreeMap, BTreeSet};

pub const PROCESS_DOWNLOAD: &str = "downloads.process_download";
pub const CLEANUP_OLD_FILES: &str = "downloads.cleanup_old_files";
pub const GENERATE_THUMBNAIL: &str = "downloads.generate_thumbnail";
pub const UPDATE_DEPENDENCIES: &str = "downloads.update_dependencies";
pub const CLEAR_EXPIRED_CACHE: &str = "downloads.clear_expired_cache";

pub const DEFAULT_QUEUE: &str = "default";

/// Maps task ids to queue names; unknown ids go to the default queue
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRouter {
    routes: BTreeMap<String, String>,
    default_queue: String,
}

impl TaskRouter {
    /// Router with no explicit routes
    pub fn new(default_queue: impl Into<String>) -> Self {
        Self {
            routes: BTreeMap::new(),
            default_queue: default_queue.into(),
        }
    }

    /// The three built-in routes onto the `default` fallback
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_QUEUE)
            .route(PROCESS_DOWNLOAD, "downloads")
            .route(CLEANUP_OLD_FILES, "cleanup")
            .route(GENERATE_THUMBNAIL, "media")
    }

    pub fn route(mut self, task_id: impl Into<String>, queue: impl Into<String>) -> Self {
        self.insert(task_id, queue);
        self
    }

    /// Add or replace a route
    pub fn insert(&mut self, task_id: impl Into<String>, queue: impl Into<String>) {
        self.routes.insert(task_id.into(), queue.into());
    }

    pub fn queue_for(&self, task_id: &str) -> &str {
        self.routes
            .get(task_id)
            .map(String::as_str)
            .unwrap_or(&self.default_queue)
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub fn routes(&self) -> &BTreeMap<String, String> {
        &self.routes
    }

    /// Every queue this router can deliver to
    pub fn queues(&self) -> BTreeSet<&str> {
        self.routes
            .values()
            .map(String::as_str)
            .chain(std::iter::once(self.default_queue.as_str()))
            .collect()
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}
