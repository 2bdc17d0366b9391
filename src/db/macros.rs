//! Database dispatch macros for reducing code duplication.
//!
//! The macros expand one match arm per backend so that the body is type-checked
//! against each concrete sqlx driver (inherent methods such as `rows_affected`
//! differ per backend and have no common trait).

/// Dispatch over the backends of a `DbPool`.
///
/// Either one arm per variant, or a single body expanded once per backend
/// with `$p` bound to the concrete sqlx pool.
///
/// ```ignore
/// let kind = impl_db_dispatch!(pool, {
///     MySql(_p) => "mysql",
///     Postgres(_p) => "postgres",
///     SQLite(_p) => "sqlite",
/// });
/// impl_db_dispatch!(pool, |p| p.close().await);
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool {
            $crate::db::pool::DbPool::MySql($p) => $body,
            $crate::db::pool::DbPool::Postgres($p) => $body,
            $crate::db::pool::DbPool::SQLite($p) => $body,
        }
    };
}

/// Run the same body against whichever backend a `DbConnection` holds.
///
/// `$conn` binds the inner `PoolConnection<DB>` and `$db` names the sqlx
/// database type of the arm, so the body can call generic helpers with it.
///
/// ```ignore
/// let n = with_connection!(&mut conn, |c, DB| {
///     let args = arguments::<DB>(params)?;
///     sqlx::query_with(sql, args).execute(&mut **c).await?.rows_affected()
/// });
/// ```
#[macro_export]
macro_rules! with_connection {
    ($conn:expr, |$c:ident, $db:ident| $body:expr) => {
        match $conn {
            $crate::db::pool::DbConnection::MySql($c) => {
                #[allow(dead_code)]
                type $db = ::sqlx::MySql;
                $body
            }
            $crate::db::pool::DbConnection::Postgres($c) => {
                #[allow(dead_code)]
                type $db = ::sqlx::Postgres;
                $body
            }
            $crate::db::pool::DbConnection::SQLite($c) => {
                #[allow(dead_code)]
                type $db = ::sqlx::Sqlite;
                $body
            }
        }
    };
}

pub use impl_db_dispatch;
pub use with_connection;
