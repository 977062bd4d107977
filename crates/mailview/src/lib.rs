//! Mailview crate - saved searches and virtual folders over a message index
//!
//! This crate provides platform-independent search and view logic:
//! - Domain models (Message, Folder, VirtualFolder)
//! - Predicate trees and the advanced-search predicate builder
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Asynchronous query execution with live result sets
//! - The virtual folder registry
//! - View wrappers binding a list to a real or virtual folder
//!
//! This crate has zero UI dependencies; a list widget only has to implement
//! `ViewListener`.

pub mod error;
pub mod models;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod view;

pub use error::{RegistryError, ViewError};
pub use models::{
    AccountId, CombineMode, EmailAddress, Folder, FolderId, FolderKind, Message, MessageId,
    MessageRef, SortKey, SortOrder, SortSpec, ViewPrefs, VirtualFolder, VirtualFolderId,
};
pub use predicate::{
    AttachmentFilter, BuiltQuery, DateRange, Leaf, MatchKeys, PredicateNode, SearchCriteria,
    TextField, build, build_at,
};
pub use query::{
    ObservableCollection, QueryEvent, QueryExecutor, QueryHandle, QueryId, QueryUpdate,
    ScopedSearch, SearchScope,
};
pub use registry::{RegistryEvent, RegistryObserver, VirtualFolderRegistry};
pub use settings::Settings;
pub use storage::{
    FolderEvent, FolderLifecycle, FolderObserver, InMemoryIndex, IndexError, IndexEvent,
    MemoryPrefStore, MessageIndex, PrefStore, Scope, SqlitePrefStore,
};
pub use view::{MailView, ViewContext, ViewListener, ViewRow, ViewState, ViewTarget, ViewWrapper};
