//! Query compilation for remote list reads.
//!
//! Turns a predicate tree and an ordering into the remote store's `filter`
//! and `sort` parameters. Compilation is pure and rejects anything it cannot
//! translate exactly:
//!
//! ```ignore
//! use collection_sync::query::{and, eq, gt, ListOptions, OrderBy};
//!
//! let filter = and(vec![eq(["genre"], "Fantasy"), gt(["page_count"], 100)]);
//! let options = ListOptions::compile(Some(&filter), &[OrderBy::desc(["created"])])?;
//! assert_eq!(options.filter.as_deref(), Some(r#"(genre = "Fantasy" && page_count > 100)"#));
//! assert_eq!(options.sort.as_deref(), Some("-created"));
//! ```

mod expr;
mod filter;
mod sort;

pub use expr::{
    and, eq, field, func, gt, gte, in_list, is_null, is_undefined, like, lt, lte, not, or, val,
    Expr, FieldPath, Value,
};
pub use filter::{compile_filter, escape_value, SUPPORTED_OPERATORS};
pub use sort::{compile_sort, Direction, OrderBy};

use crate::error::CompileResult;

/// Compiled parameters for a remote list read. Absent fields are omitted
/// from the request entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub filter: Option<String>,
    pub sort: Option<String>,
}

impl ListOptions {
    pub fn compile(filter: Option<&Expr>, order: &[OrderBy]) -> CompileResult<Self> {
        Ok(Self {
            filter: compile_filter(filter)?,
            sort: compile_sort(order),
        })
    }

    /// Present parameters as `(name, value)` pairs.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(2);
        if let Some(filter) = &self.filter {
            pairs.push(("filter", filter.clone()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort", sort.clone()));
        }
        pairs
    }
}
