// Domain layer - Pure types and cache algorithms
pub mod cache_record;
pub mod error;
pub mod series;
pub mod timestamp;
