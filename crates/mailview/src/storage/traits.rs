//! Storage trait definitions
//!
//! The index engine, the folder lifecycle manager and the preference store are
//! collaborators of the query and view layers. They are only used through
//! these traits.

use std::sync::Arc;
use std::sync::mpsc::Sender;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{
    AccountId, Folder, FolderId, Message, MessageId, MessageRef, ViewPrefs, VirtualFolder,
    VirtualFolderId,
};
use crate::predicate::PredicateNode;

/// Breadth a predicate is evaluated over
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// A single folder
    Folder(FolderId),
    /// Every folder under one account root
    Account(AccountId),
    /// Every folder in the store
    Global,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Folder(id) => write!(f, "folder {}", id),
            Scope::Account(id) => write!(f, "account {}", id.as_str()),
            Scope::Global => f.write_str("global"),
        }
    }
}

/// Errors reported by the index engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("Index cannot answer queries for {scope}")]
    ScopeUnavailable { scope: String },
}

/// Row-level change reported by the index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    Added(Message),
    Modified(Message),
    Removed(MessageRef),
}

/// Folder lifecycle change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderEvent {
    Added(Folder),
    Removed(FolderId),
    Renamed { old: FolderId, new: FolderId },
}

/// Handle for a mutation subscription or folder observer registration
pub type SubscriptionId = u64;

/// Message index able to answer predicate queries and report mutations
pub trait MessageIndex: Send + Sync {
    /// All non-deleted messages within `scope` matching `predicate`
    fn query(&self, predicate: &PredicateNode, scope: &Scope) -> Result<Vec<Message>, IndexError>;

    /// Look up one message; `None` if it no longer exists
    fn get(&self, id: &MessageId) -> Option<Message>;

    /// Forward every mutation inside `scope` to `sender` until unsubscribed
    fn subscribe(&self, scope: Scope, sender: Sender<IndexEvent>) -> SubscriptionId;

    /// Drop a mutation subscription; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Receives folder lifecycle events
pub trait FolderObserver: Send + Sync {
    fn on_folder_event(&self, event: &FolderEvent);
}

/// Folder hierarchy and lifecycle notifications
pub trait FolderLifecycle: Send + Sync {
    fn folder(&self, id: &FolderId) -> Option<Folder>;

    fn folders(&self) -> Vec<Folder>;

    /// Leaf folders covered by `scope`; roots never hold messages
    fn resolve_scope(&self, scope: &Scope) -> Vec<FolderId>;

    /// Whether new mail arrived in the folder since its flag was last cleared
    fn has_new_messages(&self, id: &FolderId) -> bool;

    /// Register an observer; it is held weakly and pruned once dropped
    fn add_observer(&self, observer: &Arc<dyn FolderObserver>) -> SubscriptionId;

    fn remove_observer(&self, id: SubscriptionId);
}

/// Key-value persistence for saved searches and per-folder view preferences
pub trait PrefStore: Send + Sync {
    fn load_virtual_folders(&self) -> Result<Vec<VirtualFolder>>;

    /// Insert or replace a virtual folder record
    fn save_virtual_folder(&self, folder: &VirtualFolder) -> Result<()>;

    /// Remove a virtual folder record; missing records are not an error
    fn delete_virtual_folder(&self, id: &VirtualFolderId) -> Result<()>;

    fn load_view_prefs(&self, folder: &FolderId) -> Result<Option<ViewPrefs>>;

    fn save_view_prefs(&self, folder: &FolderId, prefs: &ViewPrefs) -> Result<()>;

    fn delete_view_prefs(&self, folder: &FolderId) -> Result<()>;
}
