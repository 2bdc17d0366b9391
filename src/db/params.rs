//! Parameter binding utilities for database queries.
//!
//! This module converts `QueryParam` values into the argument buffer of any
//! supported backend, for use with `sqlx::query_with` and friends.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use sqlx::{Arguments, Database, Encode, Type};

/// Build the argument buffer for `params` in positional order.
pub(crate) fn arguments<'q, DB>(params: &'q [QueryParam]) -> DbResult<DB::Arguments<'q>>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    let mut args: DB::Arguments<'q> = Default::default();
    for (index, param) in params.iter().enumerate() {
        let bound = match param {
            QueryParam::Null => args.add(None::<String>),
            QueryParam::Bool(v) => args.add(*v),
            QueryParam::Int(v) => args.add(*v),
            QueryParam::Float(v) => args.add(*v),
            QueryParam::String(v) => args.add(v.as_str()),
            QueryParam::Bytes(v) => args.add(v.as_slice()),
        };
        bound.map_err(|e| {
            DbError::invalid_input(
                format!(
                    "Failed to bind parameter {} ({}): {}",
                    index + 1,
                    param.type_name(),
                    e
                ),
                "Check that the parameter matches the column type",
            )
        })?;
    }
    Ok(args)
}
