//! Virtual folder (saved search) model and persisted view preferences

use serde::{Deserialize, Serialize};

use super::{AccountId, FolderId};
use crate::predicate::PredicateNode;

/// Unique identifier for a virtual folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VirtualFolderId(pub String);

impl VirtualFolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VirtualFolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for VirtualFolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the clauses of a saved predicate are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// All clauses must match
    #[default]
    And,
    /// Any clause may match
    Or,
}

/// Column a view is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Date,
    Subject,
    Sender,
    Recipients,
    Unread,
    Folder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Primary sort column and direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(key: SortKey, order: SortOrder) -> Self {
        Self { key, order }
    }
}

/// Persisted sort/thread preference for one folder
///
/// Unset values fall back to the application defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewPrefs {
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub threaded: Option<bool>,
}

impl ViewPrefs {
    pub fn is_empty(&self) -> bool {
        self.sort.is_none() && self.threaded.is_none()
    }
}

/// A saved search that behaves like a folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFolder {
    pub id: VirtualFolderId,
    pub name: String,
    /// Account the folder is listed under; `None` for local folders
    #[serde(default)]
    pub parent: Option<AccountId>,
    pub predicate: PredicateNode,
    #[serde(default)]
    pub combine: CombineMode,
    /// Leaf folders searched, in the order they were added
    pub backing: Vec<FolderId>,
    #[serde(default)]
    pub view: ViewPrefs,
}

impl VirtualFolder {
    /// A virtual folder with no backing folders left is orphaned
    pub fn is_orphaned(&self) -> bool {
        self.backing.is_empty()
    }

    pub fn is_backed_by(&self, folder: &FolderId) -> bool {
        self.backing.contains(folder)
    }

    /// User predicate with the combine mode applied
    ///
    /// With [`CombineMode::And`] the stored predicate is used as-is. With
    /// [`CombineMode::Or`] its top-level clauses are recombined with OR.
    pub fn combined_predicate(&self) -> PredicateNode {
        match self.combine {
            CombineMode::And => self.predicate.clone(),
            CombineMode::Or if self.predicate.is_match_all() => PredicateNode::all(),
            CombineMode::Or => PredicateNode::Or(self.predicate.clauses()),
        }
    }

    /// Predicate restricted to every backing folder
    pub fn effective_predicate(&self) -> PredicateNode {
        self.combined_predicate()
            .and_also(PredicateNode::in_folders(&self.backing))
    }

    /// Predicate evaluated independently against one backing folder
    pub fn folder_predicate(&self, folder: &FolderId) -> PredicateNode {
        self.combined_predicate()
            .and_also(PredicateNode::in_folders([folder]))
    }
}
