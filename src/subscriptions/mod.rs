//! Live subscriptions mirroring remote entities into local stores.
//!
//! The manager owns one subscription per (entity, selector) key:
//! - Concurrent subscribes for a key share a single remote subscription
//! - Interest is reference-counted per entity, with a grace period before
//!   the last subscriber's departure tears anything down
//! - Stream failures are retried with exponential backoff until a budget
//!   runs out
//!
//! Each delivered batch of events is committed to the local store in one
//! atomic write.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(remote);
//! let books = Arc::new(MemoryCollection::new());
//!
//! // A consumer starts caring about books
//! manager.add_subscriber("books", books.clone())?;
//! manager.wait_for_subscription("books", &Selector::All).await?;
//!
//! // ...and stops; the subscription lingers for `cleanup_delay_ms`
//! manager.remove_subscriber("books");
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{SubscriptionConfig, SubscriptionStatus};
