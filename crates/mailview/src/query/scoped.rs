//! One predicate searched at folder, account and global breadth at once

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, info};

use super::collection::ObservableCollection;
use super::executor::{QueryExecutor, QueryUpdate};
use crate::models::{FolderId, Message};
use crate::predicate::PredicateNode;
use crate::storage::{FolderLifecycle, Scope};

/// Which of the three result sets to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    /// The currently selected folder
    Folder,
    /// Every folder of the selected folder's account
    Account,
    /// Every folder
    Global,
}

impl SearchScope {
    pub const ALL: [SearchScope; 3] = [SearchScope::Folder, SearchScope::Account, SearchScope::Global];
}

/// Three concurrent queries sharing one event queue
///
/// Without a selected folder the folder and account results are empty and
/// count as complete from the start.
pub struct ScopedSearch {
    rx: Receiver<QueryUpdate>,
    folder: Option<ObservableCollection>,
    account: Option<ObservableCollection>,
    global: ObservableCollection,
}

impl ScopedSearch {
    pub fn start(
        executor: &QueryExecutor,
        folders: &dyn FolderLifecycle,
        predicate: PredicateNode,
        current: Option<&FolderId>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let current = current.and_then(|id| folders.folder(id));

        let (folder, account) = match current {
            Some(current) => {
                let folder = executor.execute(
                    predicate.clone(),
                    Scope::Folder(current.id.clone()),
                    tx.clone(),
                );
                let account =
                    executor.execute(predicate.clone(), Scope::Account(current.account), tx.clone());
                (
                    Some(ObservableCollection::new(folder)),
                    Some(ObservableCollection::new(account)),
                )
            }
            None => (None, None),
        };
        let global = ObservableCollection::new(executor.execute(predicate, Scope::Global, tx));

        info!(
            "[QUERY] Started scoped search ({} scopes)",
            1 + folder.is_some() as usize + account.is_some() as usize
        );
        Self {
            rx,
            folder,
            account,
            global,
        }
    }

    /// Apply every queued event; returns whether any result set changed
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        while let Ok(update) = self.rx.try_recv() {
            changed |= self.apply(update);
        }
        changed
    }

    fn apply(&mut self, update: QueryUpdate) -> bool {
        let target = [&mut self.folder, &mut self.account]
            .into_iter()
            .flatten()
            .chain(std::iter::once(&mut self.global))
            .find(|c| c.query_id() == update.query);

        match target {
            Some(collection) => collection.apply(update.event),
            None => {
                debug!("[QUERY] Dropping event for unknown {}", update.query);
                false
            }
        }
    }

    /// Number of scopes whose initial scan is done (0 to 3)
    pub fn completed(&self) -> usize {
        SearchScope::ALL
            .iter()
            .filter(|scope| self.collection(**scope).is_none_or(|c| c.is_complete()))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == SearchScope::ALL.len()
    }

    pub fn collection(&self, scope: SearchScope) -> Option<&ObservableCollection> {
        match scope {
            SearchScope::Folder => self.folder.as_ref(),
            SearchScope::Account => self.account.as_ref(),
            SearchScope::Global => Some(&self.global),
        }
    }

    /// Current rows for one scope; empty when the scope was not searched
    pub fn results(&self, scope: SearchScope) -> &[Message] {
        self.collection(scope).map(|c| c.items()).unwrap_or_default()
    }

    /// Block until all three scopes complete or `timeout` passes
    ///
    /// Returns whether the search completed.
    pub fn wait_complete(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while !self.is_complete() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(update) => {
                    self.apply(update);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.is_complete()
    }
}
