//! Database layer.
//!
//! This module provides:
//! - Engine discovery and configuration from environment-style variables
//! - Connection pools per backend
//! - Sessions (one connection, one transaction) and their finalization
//! - The session factory map shared by all requests
//! - Database dispatch macros for reducing code duplication

pub mod engine;
pub mod factory;
pub mod lifecycle;
pub mod macros;
pub mod params;
pub mod pool;
pub mod session;

pub use engine::{EngineHandle, EngineRegistry, EnvLayout};
pub use factory::{SessionFactories, SessionFactory, StartupHook};
pub use lifecycle::{Finalization, Outcome, ScopedSession, UnitOfWork, finalize, finalize_result};
pub use pool::{DbConnection, DbPool, LIVENESS_PROBE_SQL};
pub use session::{FromDbRow, Session, SessionHandle};
