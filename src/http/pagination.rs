//! Offset/limit pagination of queries run through a request session.

use crate::db::{FromDbRow, SessionFactories, SessionHandle};
use crate::error::{DbError, DbResult};
use crate::http::dependency::SessionDependency;
use crate::models::{DEFAULT_ENGINE_KEY, Meta, Page, QueryParam};
use axum::extract::{FromRef, FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Default items per page
pub const DEFAULT_LIMIT: u64 = 10;

/// Maximum items per page
pub const MAX_LIMIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
    /// Page size used when the request has no `limit`
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

/// Raw `offset` and `limit` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Validated pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    offset: u64,
    limit: u64,
}

impl Pagination {
    /// Validate request parameters against `config`.
    ///
    /// - `offset` defaults to 0 and must not be negative
    /// - `limit` defaults to `config.default_limit` and must be in `1..=config.max_limit`
    pub fn from_params(params: &PaginationParams, config: &PaginationConfig) -> DbResult<Self> {
        let offset = params.offset.unwrap_or(0);
        if offset < 0 {
            return Err(DbError::invalid_input(
                format!("offset must be greater than or equal to 0, got {}", offset),
                "Use a non-negative offset",
            ));
        }

        let limit = match params.limit {
            None => config.default_limit,
            Some(limit) if limit < 1 || limit as u64 > config.max_limit => {
                return Err(DbError::invalid_input(
                    format!("limit must be between 1 and {}, got {}", config.max_limit, limit),
                    format!("Use a limit <= {}", config.max_limit),
                ));
            }
            Some(limit) => limit as u64,
        };

        Ok(Self {
            offset: offset as u64,
            limit,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The query restricted to this window.
    pub fn page_sql(&self, sql: &str) -> String {
        format!(
            "{} LIMIT {} OFFSET {}",
            trim_statement(sql),
            self.limit,
            self.offset
        )
    }

    pub fn meta(&self, total_items: u64) -> Meta {
        Meta::new(self.offset, self.limit, total_items)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Count query running `sql` as a subquery.
pub fn default_count_sql(sql: &str) -> String {
    format!("SELECT COUNT(*) FROM ({}) AS counted", trim_statement(sql))
}

/// Count the rows `sql` returns.
pub async fn default_query_count(
    session: &SessionHandle,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<u64> {
    let total: i64 = session.fetch_scalar(&default_count_sql(sql), params).await?;
    Ok(total.max(0) as u64)
}

/// Fetch one page of `sql`, counting the total with [`default_query_count`].
pub async fn paginate<T: FromDbRow>(
    session: &SessionHandle,
    pagination: Pagination,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Page<T>> {
    let total_items = default_query_count(session, sql, params).await?;
    paginate_with_total(session, pagination, sql, params, total_items).await
}

/// Fetch one page of `sql` with a caller-computed total.
pub async fn paginate_with_total<T: FromDbRow>(
    session: &SessionHandle,
    pagination: Pagination,
    sql: &str,
    params: &[QueryParam],
    total_items: u64,
) -> DbResult<Page<T>> {
    let data = session.fetch_all(&pagination.page_sql(sql), params).await?;
    debug!(
        session_id = %session.id(),
        offset = pagination.offset(),
        limit = pagination.limit(),
        total_items = total_items,
        "Fetched page"
    );
    Ok(Page::new(data, pagination.meta(total_items)))
}

/// Engine key and page size limits of a [`Paginate`] extractor, named at the type level.
///
/// ```ignore
/// struct ReportPages;
/// impl PaginationSettings for ReportPages {
///     const KEY: &'static str = "reporting";
///     const MAX_PAGE_SIZE: u64 = 500;
/// }
///
/// async fn list_reports(paginate: Paginate<ReportPages>) -> DbResult<Json<Page<Report>>> { .. }
/// ```
pub trait PaginationSettings: Send + Sync + 'static {
    const KEY: &'static str = DEFAULT_ENGINE_KEY;
    const DEFAULT_PAGE_SIZE: u64 = DEFAULT_LIMIT;
    const MAX_PAGE_SIZE: u64 = MAX_LIMIT;

    fn config() -> PaginationConfig {
        PaginationConfig {
            default_limit: Self::DEFAULT_PAGE_SIZE,
            max_limit: Self::MAX_PAGE_SIZE,
        }
    }
}

/// Default engine, default limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPagination;

impl PaginationSettings for DefaultPagination {}

/// Session of the engine named by `P` plus the validated pagination window of the request.
///
/// ```ignore
/// async fn list_notes(paginate: Paginate) -> DbResult<Json<Page<Note>>> {
///     Ok(Json(paginate.fetch("SELECT id, body FROM notes ORDER BY id", &[]).await?))
/// }
/// ```
pub struct Paginate<P: PaginationSettings = DefaultPagination> {
    pub session: SessionHandle,
    pub pagination: Pagination,
    _settings: PhantomData<fn() -> P>,
}

impl<P: PaginationSettings> Paginate<P> {
    pub async fn fetch<T: FromDbRow>(&self, sql: &str, params: &[QueryParam]) -> DbResult<Page<T>> {
        paginate(&self.session, self.pagination, sql, params).await
    }

    /// Fetch a page using a total computed by the caller (e.g. a cheaper count query).
    pub async fn fetch_with_total<T: FromDbRow>(
        &self,
        sql: &str,
        params: &[QueryParam],
        total_items: u64,
    ) -> DbResult<Page<T>> {
        paginate_with_total(&self.session, self.pagination, sql, params, total_items).await
    }
}

impl<P: PaginationSettings> Clone for Paginate<P> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            pagination: self.pagination,
            _settings: PhantomData,
        }
    }
}

impl<P: PaginationSettings> std::fmt::Debug for Paginate<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginate")
            .field("key", &P::KEY)
            .field("session", &self.session)
            .field("pagination", &self.pagination)
            .finish()
    }
}

impl<S, P> FromRequestParts<S> for Paginate<P>
where
    Arc<SessionFactories>: FromRef<S>,
    S: Send + Sync,
    P: PaginationSettings,
{
    type Rejection = DbError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<PaginationParams>::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                DbError::invalid_input(
                    e.body_text(),
                    "offset and limit must be integers",
                )
            })?;
        let pagination = Pagination::from_params(&params, &P::config())?;

        let factories = Arc::<SessionFactories>::from_ref(state);
        let session = SessionDependency::new(P::KEY)
            .resolve(&parts.extensions, &factories)
            .await?;
        Ok(Self {
            session,
            pagination,
            _settings: PhantomData,
        })
    }
}
