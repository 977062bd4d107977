//! In-memory storage implementation
//!
//! `InMemoryIndex` is the reference message index and folder lifecycle
//! manager used by tests and by the CLI when loading a mailbox dump.
//! `MemoryPrefStore` keeps preferences for the lifetime of the process.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use anyhow::Result;
use log::{debug, info};
use rayon::prelude::*;

use super::traits::{
    FolderEvent, FolderLifecycle, FolderObserver, IndexError, IndexEvent, MessageIndex,
    PrefStore, Scope, SubscriptionId,
};
use crate::models::{
    AccountId, Folder, FolderId, Message, MessageId, MessageRef, ViewPrefs, VirtualFolder,
    VirtualFolderId,
};
use crate::predicate::PredicateNode;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Folder plus its new-mail flag
struct FolderEntry {
    folder: Folder,
    has_new: bool,
}

struct Subscriber {
    scope: Scope,
    sender: Sender<IndexEvent>,
}

/// In-memory implementation of MessageIndex and FolderLifecycle
///
/// Uses maps protected by RwLocks for thread-safe access. Mutations are
/// pushed to subscribers after the locks are released.
pub struct InMemoryIndex {
    folders: RwLock<BTreeMap<FolderId, FolderEntry>>,
    messages: RwLock<HashMap<MessageId, Message>>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    observers: RwLock<HashMap<SubscriptionId, Weak<dyn FolderObserver>>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self {
            folders: RwLock::new(BTreeMap::new()),
            messages: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate the store going offline; queries fail with `ScopeUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn add_folder(&self, folder: Folder) {
        debug!("[INDEX] Adding folder {}", folder.id);
        write(&self.folders).insert(
            folder.id.clone(),
            FolderEntry {
                folder: folder.clone(),
                has_new: false,
            },
        );
        self.notify_observers(&FolderEvent::Added(folder));
    }

    /// Delete a folder and every message in it
    ///
    /// Deleting an account root deletes every folder of that account.
    pub fn delete_folder(&self, id: &FolderId) {
        let (account, doomed): (AccountId, Vec<FolderId>) = {
            let folders = read(&self.folders);
            let Some(entry) = folders.get(id) else {
                return;
            };
            let doomed = if entry.folder.is_root() {
                folders
                    .values()
                    .filter(|e| e.folder.account == entry.folder.account)
                    .map(|e| e.folder.id.clone())
                    .collect()
            } else {
                vec![id.clone()]
            };
            (entry.folder.account.clone(), doomed)
        };

        for folder_id in doomed {
            let removed: Vec<MessageRef> = {
                let mut messages = write(&self.messages);
                let ids: Vec<MessageId> = messages
                    .values()
                    .filter(|m| m.folder == folder_id)
                    .map(|m| m.id.clone())
                    .collect();
                ids.iter()
                    .filter_map(|mid| messages.remove(mid))
                    .map(|m| m.reference())
                    .collect()
            };
            write(&self.folders).remove(&folder_id);
            info!("[INDEX] Deleted folder {} ({} messages)", folder_id, removed.len());

            for reference in removed {
                self.publish(IndexEvent::Removed(reference), Some(&account));
            }
            self.notify_observers(&FolderEvent::Removed(folder_id));
        }
    }

    /// Rename a folder; its messages move to the new id
    pub fn rename_folder(&self, old: &FolderId, new: FolderId, name: impl Into<String>) {
        let account = {
            let mut folders = write(&self.folders);
            let Some(mut entry) = folders.remove(old) else {
                return;
            };
            entry.folder.id = new.clone();
            entry.folder.name = name.into();
            let account = entry.folder.account.clone();
            folders.insert(new.clone(), entry);
            account
        };

        let moved: Vec<(MessageRef, Message)> = {
            let mut messages = write(&self.messages);
            messages
                .values_mut()
                .filter(|m| &m.folder == old)
                .map(|m| {
                    let before = m.reference();
                    m.folder = new.clone();
                    (before, m.clone())
                })
                .collect()
        };

        for (before, after) in moved {
            self.publish(IndexEvent::Removed(before), Some(&account));
            self.publish(IndexEvent::Added(after), Some(&account));
        }
        self.notify_observers(&FolderEvent::Renamed {
            old: old.clone(),
            new,
        });
    }

    /// Insert or replace a message
    ///
    /// New messages set their folder's new-mail flag.
    pub fn add_message(&self, message: Message) {
        let existed = write(&self.messages)
            .insert(message.id.clone(), message.clone())
            .is_some();

        let account = self.account_of(&message.folder);
        if existed {
            self.publish(IndexEvent::Modified(message), account.as_ref());
        } else {
            if let Some(entry) = write(&self.folders).get_mut(&message.folder) {
                entry.has_new = true;
            }
            self.publish(IndexEvent::Added(message), account.as_ref());
        }
    }

    /// Apply `update` to a stored message and report the modification
    pub fn update_message(&self, id: &MessageId, update: impl FnOnce(&mut Message)) -> bool {
        let updated = {
            let mut messages = write(&self.messages);
            messages.get_mut(id).map(|m| {
                update(m);
                m.clone()
            })
        };

        match updated {
            Some(message) => {
                let account = self.account_of(&message.folder);
                self.publish(IndexEvent::Modified(message), account.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn set_unread(&self, id: &MessageId, is_unread: bool) -> bool {
        self.update_message(id, |m| m.is_unread = is_unread)
    }

    /// Mark a message deleted without expunging it
    pub fn set_deleted(&self, id: &MessageId, is_deleted: bool) -> bool {
        self.update_message(id, |m| m.is_deleted = is_deleted)
    }

    pub fn remove_message(&self, id: &MessageId) -> bool {
        let removed = write(&self.messages).remove(id);
        match removed {
            Some(message) => {
                let account = self.account_of(&message.folder);
                self.publish(IndexEvent::Removed(message.reference()), account.as_ref());
                true
            }
            None => false,
        }
    }

    pub fn clear_new_messages(&self, id: &FolderId) {
        if let Some(entry) = write(&self.folders).get_mut(id) {
            entry.has_new = false;
        }
    }

    pub fn message_count(&self) -> usize {
        read(&self.messages).len()
    }

    fn account_of(&self, folder: &FolderId) -> Option<AccountId> {
        read(&self.folders)
            .get(folder)
            .map(|e| e.folder.account.clone())
    }

    /// Deliver `event` to every subscriber whose scope covers it
    ///
    /// `account` is resolved by the caller since the folder may already be gone.
    fn publish(&self, event: IndexEvent, account: Option<&AccountId>) {
        let folder = match &event {
            IndexEvent::Added(m) | IndexEvent::Modified(m) => m.folder.clone(),
            IndexEvent::Removed(r) => r.folder.clone(),
        };

        let targets: Vec<(SubscriptionId, Sender<IndexEvent>)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, s)| match &s.scope {
                Scope::Folder(id) => *id == folder,
                Scope::Account(id) => Some(id) == account,
                Scope::Global => true,
            })
            .map(|(id, s)| (*id, s.sender.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(event.clone()).is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    fn notify_observers(&self, event: &FolderEvent) {
        let live: Vec<Arc<dyn FolderObserver>> = {
            let mut observers = write(&self.observers);
            observers.retain(|_, weak| weak.strong_count() > 0);
            observers.values().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.on_folder_event(event);
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIndex for InMemoryIndex {
    fn query(&self, predicate: &PredicateNode, scope: &Scope) -> Result<Vec<Message>, IndexError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IndexError::ScopeUnavailable {
                scope: scope.to_string(),
            });
        }

        let folders: HashSet<FolderId> = self.resolve_scope(scope).into_iter().collect();
        let messages = read(&self.messages);
        let mut matches: Vec<Message> = messages
            .par_iter()
            .filter(|(_, m)| !m.is_deleted && folders.contains(&m.folder))
            .filter(|(_, m)| predicate.matches(m))
            .map(|(_, m)| m.clone())
            .collect();

        matches.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        debug!("[INDEX] Query over {} matched {} messages", scope, matches.len());
        Ok(matches)
    }

    fn get(&self, id: &MessageId) -> Option<Message> {
        read(&self.messages).get(id).cloned()
    }

    fn subscribe(&self, scope: Scope, sender: Sender<IndexEvent>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscriber { scope, sender });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

impl FolderLifecycle for InMemoryIndex {
    fn folder(&self, id: &FolderId) -> Option<Folder> {
        read(&self.folders).get(id).map(|e| e.folder.clone())
    }

    fn folders(&self) -> Vec<Folder> {
        read(&self.folders).values().map(|e| e.folder.clone()).collect()
    }

    fn resolve_scope(&self, scope: &Scope) -> Vec<FolderId> {
        read(&self.folders)
            .values()
            .filter(|e| !e.folder.is_root())
            .filter(|e| match scope {
                Scope::Folder(id) => &e.folder.id == id,
                Scope::Account(account) => &e.folder.account == account,
                Scope::Global => true,
            })
            .map(|e| e.folder.id.clone())
            .collect()
    }

    fn has_new_messages(&self, id: &FolderId) -> bool {
        read(&self.folders).get(id).is_some_and(|e| e.has_new)
    }

    fn add_observer(&self, observer: &Arc<dyn FolderObserver>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        write(&self.observers).insert(id, Arc::downgrade(observer));
        id
    }

    fn remove_observer(&self, id: SubscriptionId) {
        write(&self.observers).remove(&id);
    }
}

/// In-memory implementation of PrefStore
pub struct MemoryPrefStore {
    virtual_folders: RwLock<BTreeMap<VirtualFolderId, VirtualFolder>>,
    view_prefs: RwLock<HashMap<FolderId, ViewPrefs>>,
}

impl MemoryPrefStore {
    pub fn new() -> Self {
        Self {
            virtual_folders: RwLock::new(BTreeMap::new()),
            view_prefs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryPrefStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefStore for MemoryPrefStore {
    fn load_virtual_folders(&self) -> Result<Vec<VirtualFolder>> {
        Ok(read(&self.virtual_folders).values().cloned().collect())
    }

    fn save_virtual_folder(&self, folder: &VirtualFolder) -> Result<()> {
        write(&self.virtual_folders).insert(folder.id.clone(), folder.clone());
        Ok(())
    }

    fn delete_virtual_folder(&self, id: &VirtualFolderId) -> Result<()> {
        write(&self.virtual_folders).remove(id);
        Ok(())
    }

    fn load_view_prefs(&self, folder: &FolderId) -> Result<Option<ViewPrefs>> {
        Ok(read(&self.view_prefs).get(folder).copied())
    }

    fn save_view_prefs(&self, folder: &FolderId, prefs: &ViewPrefs) -> Result<()> {
        write(&self.view_prefs).insert(folder.clone(), *prefs);
        Ok(())
    }

    fn delete_view_prefs(&self, folder: &FolderId) -> Result<()> {
        write(&self.view_prefs).remove(folder);
        Ok(())
    }
}
