// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod http_query_executor;
pub mod memory_store;
pub mod query_catalog;
pub mod sqlite_store;
