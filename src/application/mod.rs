// Application layer - Cache, config and scheduling services over injected ports
pub mod cache_store;
pub mod config_store;
pub mod key_resolver;
pub mod persistence;
pub mod query_source;
pub mod refresh_scheduler;
pub mod sample_fetcher;
pub mod trend_service;

#[cfg(test)]
pub mod testing;
