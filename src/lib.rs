//! Request-scoped database sessions for axum.
//!
//! Every request gets one sqlx session (a pooled connection with an open
//! transaction) per configured engine. The session is committed when the
//! response status is below 400 and rolled back otherwise; a failed commit is
//! rolled back and turned into a 500 response.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;

pub use config::Config;
pub use db::{EngineRegistry, SessionFactories, SessionHandle};
pub use error::{DbError, DbResult};
pub use http::{DbSession, KeyedSession, Paginate, setup_middlewares};
pub use models::EngineKey;
