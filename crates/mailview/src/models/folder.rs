//! Folder model: real containers in the store hierarchy

use serde::{Deserialize, Serialize};

/// Identifier for a folder
///
/// A URI-like path (e.g. `imap://alice@example.com/INBOX`). It changes when the
/// folder is renamed, which is announced through a folder lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderId(pub String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FolderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for an account (one root folder per account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether a folder holds messages or is the root of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderKind {
    /// Store or account root; never holds messages itself
    Root,
    /// Real mail folder
    Leaf,
}

/// A real folder in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    /// Display name
    pub name: String,
    /// Account this folder lives under
    pub account: AccountId,
    pub kind: FolderKind,
}

impl Folder {
    /// Create a leaf folder
    pub fn leaf(id: impl Into<FolderId>, name: impl Into<String>, account: impl Into<AccountId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account: account.into(),
            kind: FolderKind::Leaf,
        }
    }

    /// Create an account root folder
    pub fn root(id: impl Into<FolderId>, account: impl Into<AccountId>) -> Self {
        let account = account.into();
        Self {
            id: id.into(),
            name: account.0.clone(),
            account,
            kind: FolderKind::Root,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == FolderKind::Root
    }
}
