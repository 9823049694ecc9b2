pub mod api;
pub mod cache;
pub mod config;
pub mod health;
pub mod observability;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod tasks;
pub mod worker;
