//! Domain models for indexed mail entities

mod folder;
mod message;
mod virtual_folder;

pub use folder::{AccountId, Folder, FolderId, FolderKind};
pub use message::{EmailAddress, Message, MessageBuilder, MessageId, MessageRef};
pub use virtual_folder::{
    CombineMode, SortKey, SortOrder, SortSpec, ViewPrefs, VirtualFolder, VirtualFolderId,
};
