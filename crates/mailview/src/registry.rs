//! Virtual folder registry
//!
//! Owns every saved search: creates, renames and deletes records, edits
//! their backing folder lists and persists per-folder sort/thread state.
//! Writes are serialized by one lock and reach the preference store before
//! the in-memory copy changes, so a failed write leaves no partial record.
//!
//! The registry observes folder lifecycle events and keeps backing lists in
//! step with deleted and renamed folders. Its own observers hear about every
//! record change after the store write, once the registry lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use log::{debug, info, warn};

use crate::error::RegistryError;
use crate::models::{
    AccountId, CombineMode, FolderId, SortSpec, ViewPrefs, VirtualFolder, VirtualFolderId,
};
use crate::predicate::PredicateNode;
use crate::storage::{FolderEvent, FolderLifecycle, FolderObserver, PrefStore, SubscriptionId};

const ID_PREFIX: &str = "vfolder-";

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Change to a stored virtual folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// Name, backing list or view state changed
    Changed(VirtualFolderId),
    Deleted(VirtualFolderId),
}

impl RegistryEvent {
    pub fn id(&self) -> &VirtualFolderId {
        match self {
            RegistryEvent::Changed(id) | RegistryEvent::Deleted(id) => id,
        }
    }
}

/// Receives registry changes; held weakly by the registry
pub trait RegistryObserver: Send + Sync {
    fn on_registry_event(&self, event: &RegistryEvent);
}

/// Registry of saved searches
pub struct VirtualFolderRegistry {
    store: Arc<dyn PrefStore>,
    folders: Arc<dyn FolderLifecycle>,
    records: Mutex<Vec<VirtualFolder>>,
    next_id: AtomicU64,
    observers: RwLock<HashMap<SubscriptionId, Weak<dyn RegistryObserver>>>,
    next_observer: AtomicU64,
}

impl VirtualFolderRegistry {
    /// Load persisted records and start observing folder lifecycle events
    ///
    /// Backing entries naming unknown folders or account roots are dropped
    /// (and the cleaned record saved back).
    pub fn open(
        store: Arc<dyn PrefStore>,
        folders: Arc<dyn FolderLifecycle>,
    ) -> Result<Arc<Self>> {
        let mut records = store.load_virtual_folders()?;
        for record in &mut records {
            let before = record.backing.len();
            record.backing = valid_backing(folders.as_ref(), std::mem::take(&mut record.backing));
            if record.backing.len() != before {
                warn!(
                    "[REGISTRY] Dropped {} invalid backing folders from {:?}",
                    before - record.backing.len(),
                    record.name
                );
                store.save_virtual_folder(record)?;
            }
        }

        let next_id = records
            .iter()
            .filter_map(|r| r.id.as_str().strip_prefix(ID_PREFIX)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;

        info!("[REGISTRY] Loaded {} virtual folders", records.len());
        let registry = Arc::new(Self {
            store,
            folders: Arc::clone(&folders),
            records: Mutex::new(records),
            next_id: AtomicU64::new(next_id),
            observers: RwLock::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
        });

        let observer: Arc<dyn FolderObserver> = registry.clone();
        folders.add_observer(&observer);
        Ok(registry)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<VirtualFolder>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_observer(&self, observer: &Arc<dyn RegistryObserver>) -> SubscriptionId {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::downgrade(observer));
        id
    }

    pub fn remove_observer(&self, id: SubscriptionId) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Call with the records lock released
    fn notify(&self, events: &[RegistryEvent]) {
        if events.is_empty() {
            return;
        }
        let live: Vec<Arc<dyn RegistryObserver>> = {
            let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|_, weak| weak.strong_count() > 0);
            observers.values().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            for event in events {
                observer.on_registry_event(event);
            }
        }
    }

    /// Save a new local virtual folder
    pub fn create(
        &self,
        name: &str,
        predicate: PredicateNode,
        combine: CombineMode,
        backing: Vec<FolderId>,
    ) -> Result<VirtualFolderId> {
        self.create_in(None, name, predicate, combine, backing)
    }

    /// Save a new virtual folder listed under `parent`
    pub fn create_in(
        &self,
        parent: Option<AccountId>,
        name: &str,
        predicate: PredicateNode,
        combine: CombineMode,
        backing: Vec<FolderId>,
    ) -> Result<VirtualFolderId> {
        let mut records = self.lock();
        ensure_unique(&records, parent.as_ref(), name, None)?;

        let record = VirtualFolder {
            id: VirtualFolderId::new(format!(
                "{}{}",
                ID_PREFIX,
                self.next_id.fetch_add(1, Ordering::Relaxed)
            )),
            name: name.to_string(),
            parent,
            predicate,
            combine,
            backing: valid_backing(self.folders.as_ref(), backing),
            view: ViewPrefs::default(),
        };

        self.store.save_virtual_folder(&record)?;
        info!(
            "[REGISTRY] Created {} {:?} over {} folders",
            record.id,
            record.name,
            record.backing.len()
        );
        let id = record.id.clone();
        records.push(record);
        Ok(id)
    }

    pub fn rename(&self, id: &VirtualFolderId, name: &str) -> Result<()> {
        self.update(id, |records, record| {
            ensure_unique(records, record.parent.as_ref(), name, Some(id))?;
            record.name = name.to_string();
            Ok(())
        })
    }

    /// Remove a virtual folder and its view state; unknown ids are ignored
    pub fn delete(&self, id: &VirtualFolderId) -> Result<()> {
        let removed = {
            let mut records = self.lock();
            self.store.delete_virtual_folder(id)?;
            let before = records.len();
            records.retain(|r| &r.id != id);
            records.len() != before
        };
        if removed {
            info!("[REGISTRY] Deleted {}", id);
            self.notify(&[RegistryEvent::Deleted(id.clone())]);
        }
        Ok(())
    }

    /// Add a backing folder; returns false if it was filtered out or present
    pub fn add_backing(&self, id: &VirtualFolderId, folder: &FolderId) -> Result<bool> {
        if valid_backing(self.folders.as_ref(), vec![folder.clone()]).is_empty() {
            debug!("[REGISTRY] Ignoring non-leaf backing folder {}", folder);
            return Ok(false);
        }
        self.update(id, |_, record| {
            if record.is_backed_by(folder) {
                return Ok(false);
            }
            record.backing.push(folder.clone());
            Ok(true)
        })
    }

    /// Remove a backing folder; the record stays even when orphaned
    pub fn remove_backing(&self, id: &VirtualFolderId, folder: &FolderId) -> Result<bool> {
        self.update(id, |_, record| {
            let before = record.backing.len();
            record.backing.retain(|f| f != folder);
            Ok(record.backing.len() != before)
        })
    }

    pub fn set_sort(&self, id: &VirtualFolderId, sort: SortSpec) -> Result<()> {
        self.update(id, |_, record| {
            record.view.sort = Some(sort);
            Ok(())
        })
    }

    pub fn set_threaded(&self, id: &VirtualFolderId, threaded: bool) -> Result<()> {
        self.update(id, |_, record| {
            record.view.threaded = Some(threaded);
            Ok(())
        })
    }

    pub fn get(&self, id: &VirtualFolderId) -> Option<VirtualFolder> {
        self.lock().iter().find(|r| &r.id == id).cloned()
    }

    /// Every virtual folder in creation order
    pub fn list(&self) -> Vec<VirtualFolder> {
        self.lock().clone()
    }

    /// Case-insensitive lookup within one parent namespace
    pub fn find_by_name(&self, parent: Option<&AccountId>, name: &str) -> Option<VirtualFolder> {
        self.lock()
            .iter()
            .find(|r| r.parent.as_ref() == parent && same_name(&r.name, name))
            .cloned()
    }

    pub fn is_orphaned(&self, id: &VirtualFolderId) -> Result<bool> {
        self.get(id)
            .map(|r| r.is_orphaned())
            .ok_or_else(|| RegistryError::NotFound { id: id.clone() })
    }

    /// Whether any backing folder has new mail
    pub fn has_new_messages(&self, id: &VirtualFolderId) -> bool {
        self.get(id).is_some_and(|r| {
            r.backing
                .iter()
                .any(|folder| self.folders.has_new_messages(folder))
        })
    }

    /// Apply `change` to a copy of the record, persist it, then publish it
    fn update<R>(
        &self,
        id: &VirtualFolderId,
        change: impl FnOnce(&[VirtualFolder], &mut VirtualFolder) -> Result<R>,
    ) -> Result<R> {
        let (out, changed) = {
            let mut records = self.lock();
            let pos = records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| RegistryError::NotFound { id: id.clone() })?;

            let mut record = records[pos].clone();
            let out = change(&records[..], &mut record)?;
            let changed = record != records[pos];
            if changed {
                self.store.save_virtual_folder(&record)?;
                debug!("[REGISTRY] Saved {}", record.id);
                records[pos] = record;
            }
            (out, changed)
        };
        if changed {
            self.notify(&[RegistryEvent::Changed(id.clone())]);
        }
        Ok(out)
    }

    /// Rewrite every backing list through `edit`, persisting changed records
    fn edit_backing(&self, mut edit: impl FnMut(&mut Vec<FolderId>)) {
        let mut events = Vec::new();
        {
            let mut records = self.lock();
            for record in records.iter_mut() {
                let mut backing = record.backing.clone();
                edit(&mut backing);
                if backing == record.backing {
                    continue;
                }
                let mut updated = record.clone();
                updated.backing = backing;
                match self.store.save_virtual_folder(&updated) {
                    Ok(()) => {
                        if updated.is_orphaned() {
                            warn!("[REGISTRY] {} {:?} is now orphaned", updated.id, updated.name);
                        }
                        events.push(RegistryEvent::Changed(updated.id.clone()));
                        *record = updated;
                    }
                    Err(e) => warn!("[REGISTRY] Failed to save {}: {:#}", record.id, e),
                }
            }
        }
        self.notify(&events);
    }

    /// Carry a real folder's view state over to its new id
    fn move_view_prefs(&self, old: &FolderId, new: &FolderId) -> anyhow::Result<()> {
        if let Some(prefs) = self.store.load_view_prefs(old)? {
            self.store.save_view_prefs(new, &prefs)?;
            self.store.delete_view_prefs(old)?;
        }
        Ok(())
    }
}

impl FolderObserver for VirtualFolderRegistry {
    fn on_folder_event(&self, event: &FolderEvent) {
        match event {
            FolderEvent::Removed(folder) => {
                debug!("[REGISTRY] Folder {} removed", folder);
                if let Err(e) = self.store.delete_view_prefs(folder) {
                    warn!("[REGISTRY] Failed to drop view prefs of {}: {:#}", folder, e);
                }
                self.edit_backing(|backing| backing.retain(|f| f != folder));
            }
            FolderEvent::Renamed { old, new } => {
                debug!("[REGISTRY] Folder {} renamed to {}", old, new);
                if let Err(e) = self.move_view_prefs(old, new) {
                    warn!("[REGISTRY] Failed to move view prefs of {}: {:#}", old, e);
                }
                self.edit_backing(|backing| {
                    for f in backing.iter_mut() {
                        if f == old {
                            *f = new.clone();
                        }
                    }
                });
            }
            FolderEvent::Added(_) => {}
        }
    }
}

/// Keep only known leaf folders, dropping duplicates but preserving order
fn valid_backing(folders: &dyn FolderLifecycle, backing: Vec<FolderId>) -> Vec<FolderId> {
    let mut out: Vec<FolderId> = Vec::with_capacity(backing.len());
    for id in backing {
        let is_leaf = folders.folder(&id).is_some_and(|f| !f.is_root());
        if is_leaf && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn ensure_unique(
    records: &[VirtualFolder],
    parent: Option<&AccountId>,
    name: &str,
    except: Option<&VirtualFolderId>,
) -> Result<()> {
    let taken = records.iter().any(|r| {
        Some(&r.id) != except && r.parent.as_ref() == parent && same_name(&r.name, name)
    });
    if taken {
        return Err(RegistryError::DuplicateName {
            name: name.to_string(),
        });
    }
    Ok(())
}
