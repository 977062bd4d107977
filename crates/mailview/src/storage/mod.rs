//! Storage traits and implementations
//!
//! The message index, folder lifecycle manager and preference store are
//! reached only through the traits in this module. In-memory and SQLite
//! implementations are provided.

mod memory;
mod sqlite;
mod traits;

pub use memory::{InMemoryIndex, MemoryPrefStore};
pub use sqlite::SqlitePrefStore;
pub use traits::{
    FolderEvent, FolderLifecycle, FolderObserver, IndexError, IndexEvent, MessageIndex,
    PrefStore, Scope, SubscriptionId,
};
