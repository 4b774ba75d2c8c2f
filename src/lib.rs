//! # Collection Sync
//!
//! Mirrors remote record collections into local stores and keeps them
//! current over a live event stream.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: One remote subscription per (entity, selector), shared
//!   by every interested consumer and retried with backoff when the stream
//!   fails
//! - **Local stores**: Id-keyed collections written one atomic batch at a time
//! - **Query compilation**: Predicate trees and orderings rendered into the
//!   remote filter and sort syntax
//!
//! The transport is not part of this crate; it plugs in through
//! [`RemoteSource`].
//!
//! ## Example
//!
//! ```ignore
//! use collection_sync::{MemoryCollection, Selector, SubscriptionManager};
//! use collection_sync::query::{eq, compile_filter};
//!
//! let manager = SubscriptionManager::new(Arc::new(my_transport));
//! let books = Arc::new(MemoryCollection::new());
//!
//! // Mirror every book
//! manager.subscribe("books", books.clone(), Selector::All).await?;
//!
//! // Build the filter for a list read
//! let filter = compile_filter(Some(&eq(["genre"], "Fantasy")))?;
//! assert_eq!(filter.as_deref(), Some(r#"genre = "Fantasy""#));
//! ```

pub mod collection;
pub mod error;
pub mod query;
pub mod remote;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use collection::{LocalCollection, MemoryCollection, WriteBatch, WriteOp};
pub use error::{CompileError, CompileResult, Result, SyncError};
pub use query::{compile_filter, compile_sort, Direction, Expr, ListOptions, OrderBy};
pub use remote::{EventSink, RemoteError, RemoteSource, RemoteSubscription};
pub use subscriptions::{SubscriptionConfig, SubscriptionManager, SubscriptionStatus};
pub use types::{EventAction, Record, RecordEvent, Selector, SubscriptionKey};
