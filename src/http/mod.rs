//! HTTP integration: session middleware, extractors, pagination and the demo server.

pub mod dependency;
pub mod middleware;
pub mod pagination;
pub mod routes;
pub mod server;

pub use dependency::{DbSession, KeyedSession, SessionDependency, SessionKey};
pub use middleware::{
    RequestSessions, SessionLayerState, add_session_to_request, finalize_response,
    setup_middlewares,
};
pub use pagination::{
    DefaultPagination, Paginate, Pagination, PaginationConfig, PaginationParams,
    PaginationSettings, default_count_sql, default_query_count, paginate, paginate_with_total,
};
pub use routes::{AppState, build_router, with_session_layers};
pub use server::HttpServer;
