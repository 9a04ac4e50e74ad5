// Presentation layer - HTTP surface over the trend service
pub mod app_state;
pub mod handlers;
