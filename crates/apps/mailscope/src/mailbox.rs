//! Mailbox snapshot loaded into the in-memory index

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use mailview::{AccountId, Folder, InMemoryIndex, Message};
use serde::{Deserialize, Serialize};

/// JSON snapshot of folders and messages
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Mailbox {
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Mailbox {
    pub fn load(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Build an index holding the snapshot
    ///
    /// Accounts without a root folder get one named after the account.
    /// Messages in unknown folders are skipped.
    pub fn into_index(self) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());

        let with_root: BTreeSet<&AccountId> = self
            .folders
            .iter()
            .filter(|f| f.is_root())
            .map(|f| &f.account)
            .collect();
        let missing: BTreeSet<&AccountId> = self
            .folders
            .iter()
            .map(|f| &f.account)
            .filter(|a| !with_root.contains(a))
            .collect();
        for account in missing {
            index.add_folder(Folder::root(format!("{}://", account.as_str()), account.clone()));
        }

        let known: BTreeSet<_> = self.folders.iter().map(|f| f.id.clone()).collect();
        for folder in self.folders {
            index.add_folder(folder);
        }

        let mut skipped = 0;
        for message in self.messages {
            if !known.contains(&message.folder) {
                skipped += 1;
                continue;
            }
            index.add_message(message);
        }
        if skipped > 0 {
            warn!("[INDEX] Skipped {} messages in unknown folders", skipped);
        }
        // Loaded mail is not new to the user
        for id in &known {
            index.clear_new_messages(id);
        }
        info!(
            "[INDEX] Loaded {} folders and {} messages",
            known.len(),
            index.message_count()
        );
        index
    }
}
