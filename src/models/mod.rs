//! Data models shared by the engine registry, sessions and HTTP layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod engine;
pub mod page;
pub mod query;

// Re-export commonly used types
pub use engine::{
    DEFAULT_ENGINE_KEY, DatabaseType, EngineConfig, EngineKey, LifecycleStrategy, SessionStatus,
};
pub use page::{Collection, Item, Meta, Page};
pub use query::QueryParam;
