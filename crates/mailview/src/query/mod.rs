//! Query execution
//!
//! Runs predicates against the message index on worker threads and keeps
//! their result sets live as the index changes.

mod collection;
mod executor;
mod scoped;

pub use collection::ObservableCollection;
pub use executor::{QueryEvent, QueryExecutor, QueryHandle, QueryId, QueryUpdate};
pub use scoped::{ScopedSearch, SearchScope};
