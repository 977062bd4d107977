//! View wrapper: binds one list to one real or virtual folder
//!
//! A wrapper owns one event queue. Query workers, the folder lifecycle
//! observer and the registry observer only send into it; every state change happens in a `&mut self`
//! method (`pump`, the `wait_*` helpers or an API call), so callbacks never
//! interleave with API calls on the same wrapper.
//!
//! Opening a virtual folder issues one query per backing folder. The
//! listener hears `all_messages_loaded` once, after every sub-query has
//! completed.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::mail_view::MailView;
use super::projection::{Projection, ViewRow, thread_key};
use crate::error::ViewError;
use crate::models::{FolderId, Message, MessageId, MessageRef, SortSpec, ViewPrefs, VirtualFolderId};
use crate::predicate::PredicateNode;
use crate::query::{ObservableCollection, QueryExecutor, QueryUpdate};
use crate::registry::{RegistryEvent, RegistryObserver, VirtualFolderRegistry};
use crate::settings::Settings;
use crate::storage::{FolderEvent, FolderLifecycle, FolderObserver, PrefStore, Scope, SubscriptionId};

/// What a wrapper displays
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewTarget {
    Folder(FolderId),
    Virtual(VirtualFolderId),
}

impl std::fmt::Display for ViewTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewTarget::Folder(id) => write!(f, "folder {}", id),
            ViewTarget::Virtual(id) => write!(f, "virtual folder {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Closed,
    /// Waiting for sub-queries; `completed` of `total` have finished
    Opening { completed: usize, total: usize },
    Open,
}

/// Receives list updates from a wrapper
pub trait ViewListener: Send {
    /// Every sub-query finished; fired once per open
    fn all_messages_loaded(&mut self, _rows: &[ViewRow]) {}

    /// Rows changed while open
    fn rows_changed(&mut self, _rows: &[ViewRow]) {}

    /// The wrapper detached from its target
    fn closed(&mut self) {}
}

/// Shared collaborators of every wrapper
#[derive(Clone)]
pub struct ViewContext {
    pub executor: QueryExecutor,
    pub folders: Arc<dyn FolderLifecycle>,
    pub registry: Arc<VirtualFolderRegistry>,
    pub prefs: Arc<dyn PrefStore>,
    pub settings: Settings,
}

enum ViewEvent {
    Query(QueryUpdate),
    Folder(FolderEvent),
    Registry(RegistryEvent),
}

impl From<QueryUpdate> for ViewEvent {
    fn from(update: QueryUpdate) -> Self {
        ViewEvent::Query(update)
    }
}

/// Forwards folder lifecycle events into a wrapper's queue
struct FolderForwarder {
    tx: Sender<ViewEvent>,
}

impl FolderObserver for FolderForwarder {
    fn on_folder_event(&self, event: &FolderEvent) {
        let _ = self.tx.send(ViewEvent::Folder(event.clone()));
    }
}

/// Forwards virtual folder record changes into a wrapper's queue
struct RegistryForwarder {
    tx: Sender<ViewEvent>,
}

impl RegistryObserver for RegistryForwarder {
    fn on_registry_event(&self, event: &RegistryEvent) {
        let _ = self.tx.send(ViewEvent::Registry(event.clone()));
    }
}

/// Live query over one underlying folder
struct SubQuery {
    folder: FolderId,
    collection: ObservableCollection,
}

pub struct ViewWrapper {
    ctx: ViewContext,
    listener: Option<Box<dyn ViewListener>>,
    tx: Sender<ViewEvent>,
    rx: Receiver<ViewEvent>,
    // Keep the weakly held observers alive
    _folder_forwarder: Arc<dyn FolderObserver>,
    folder_observer: SubscriptionId,
    _registry_forwarder: Arc<dyn RegistryObserver>,
    registry_observer: SubscriptionId,

    target: Option<ViewTarget>,
    state: ViewState,
    predicate: PredicateNode,
    subs: Vec<SubQuery>,
    sort: SortSpec,
    threaded: bool,
    mail_view: MailView,
    collapsed: HashSet<String>,
    rows: Vec<ViewRow>,
}

impl ViewWrapper {
    pub fn new(ctx: ViewContext) -> Self {
        let (tx, rx) = mpsc::channel();
        let folder_forwarder: Arc<dyn FolderObserver> =
            Arc::new(FolderForwarder { tx: tx.clone() });
        let folder_observer = ctx.folders.add_observer(&folder_forwarder);
        let registry_forwarder: Arc<dyn RegistryObserver> =
            Arc::new(RegistryForwarder { tx: tx.clone() });
        let registry_observer = ctx.registry.add_observer(&registry_forwarder);
        let sort = ctx.settings.default_sort;
        let threaded = ctx.settings.default_threaded;

        Self {
            ctx,
            listener: None,
            tx,
            rx,
            _folder_forwarder: folder_forwarder,
            folder_observer,
            _registry_forwarder: registry_forwarder,
            registry_observer,
            target: None,
            state: ViewState::Closed,
            predicate: PredicateNode::all(),
            subs: Vec::new(),
            sort,
            threaded,
            mail_view: MailView::All,
            collapsed: HashSet::new(),
            rows: Vec::new(),
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn ViewListener>) {
        self.listener = Some(listener);
    }

    /// Bind to `target`
    ///
    /// Reopening the current target is a no-op that keeps the mail view. A
    /// virtual folder without backing folders is refused and the current
    /// view is left untouched.
    pub fn open(&mut self, target: ViewTarget) -> Result<(), ViewError> {
        if self.state != ViewState::Closed && self.target.as_ref() == Some(&target) {
            debug!("[VIEW] Already showing {}", target);
            return Ok(());
        }

        let (predicate, underlying, prefs) = match &target {
            ViewTarget::Folder(id) => {
                let folder = self
                    .ctx
                    .folders
                    .folder(id)
                    .ok_or_else(|| ViewError::UnknownFolder { id: id.clone() })?;
                let underlying = if folder.is_root() {
                    Vec::new()
                } else {
                    vec![id.clone()]
                };
                (PredicateNode::all(), underlying, self.ctx.prefs.load_view_prefs(id)?)
            }
            ViewTarget::Virtual(id) => {
                let record = self
                    .ctx
                    .registry
                    .get(id)
                    .ok_or_else(|| ViewError::UnknownVirtualFolder { id: id.clone() })?;
                if record.is_orphaned() {
                    return Err(ViewError::EmptyVirtualFolder { id: id.clone() });
                }
                (record.combined_predicate(), record.backing, Some(record.view))
            }
        };

        self.teardown();
        self.mail_view = MailView::All;
        self.collapsed.clear();
        (self.sort, self.threaded) = self.ctx.settings.resolve(prefs);
        self.predicate = predicate;
        info!("[VIEW] Opening {} over {} folders", target, underlying.len());
        self.target = Some(target);

        for folder in underlying {
            self.attach(folder);
        }
        self.state = ViewState::Opening {
            completed: 0,
            total: self.subs.len(),
        };
        self.check_loaded();
        Ok(())
    }

    /// Detach from the current target and notify the listener
    pub fn close(&mut self) {
        if self.state == ViewState::Closed && self.target.is_none() {
            return;
        }
        if let Some(target) = &self.target {
            info!("[VIEW] Closing {}", target);
        }
        self.teardown();
        self.target = None;
        self.state = ViewState::Closed;
        if let Some(listener) = self.listener.as_mut() {
            listener.closed();
        }
    }

    /// Persist a new sort for the bound target, then re-project
    ///
    /// A failed write leaves both the sort and the rows unchanged.
    pub fn sort(&mut self, sort: SortSpec) -> Result<(), ViewError> {
        match &self.target {
            Some(ViewTarget::Virtual(id)) => self.ctx.registry.set_sort(id, sort)?,
            Some(ViewTarget::Folder(id)) => {
                self.save_folder_prefs(id, |prefs| prefs.sort = Some(sort))?
            }
            None => {}
        }
        self.sort = sort;
        self.reproject();
        Ok(())
    }

    /// Persist threading for the bound target, then re-project
    pub fn set_threaded(&mut self, threaded: bool) -> Result<(), ViewError> {
        match &self.target {
            Some(ViewTarget::Virtual(id)) => self.ctx.registry.set_threaded(id, threaded)?,
            Some(ViewTarget::Folder(id)) => {
                self.save_folder_prefs(id, |prefs| prefs.threaded = Some(threaded))?
            }
            None => {}
        }
        self.threaded = threaded;
        self.reproject();
        Ok(())
    }

    /// Layer a secondary filter over the bound target
    pub fn set_mail_view(&mut self, view: MailView) {
        if self.mail_view != view {
            self.mail_view = view;
            self.reproject();
        }
    }

    /// Collapse or expand the thread containing `id`
    pub fn toggle_thread(&mut self, id: &MessageId) {
        let Some(key) = self.messages().find(|m| &m.id == id).map(|m| thread_key(&m.subject))
        else {
            return;
        };
        if !self.collapsed.remove(&key) {
            self.collapsed.insert(key);
        }
        self.reproject();
    }

    /// Re-project from the live collections
    pub fn refresh(&mut self) {
        self.pump();
        self.reproject();
    }

    /// Reconcile sub-queries with the virtual folder's current record
    ///
    /// Runs on every registry change for the bound folder. Closes the view
    /// when the record is gone or orphaned; otherwise keeps the live
    /// sub-queries that are still backed and starts the missing ones, in
    /// backing order.
    pub fn refresh_backing(&mut self) {
        let Some(ViewTarget::Virtual(id)) = self.target.clone() else {
            return;
        };
        let Some(record) = self.ctx.registry.get(&id) else {
            info!("[VIEW] {} no longer exists", id);
            self.close();
            return;
        };
        if record.is_orphaned() {
            info!("[VIEW] {} has no backing folders left", id);
            self.close();
            return;
        }
        if self.underlying_folders() == record.backing {
            return;
        }

        let mut previous = std::mem::take(&mut self.subs);
        let mut added = 0;
        for folder in record.backing {
            match previous.iter().position(|sub| sub.folder == folder) {
                Some(pos) => self.subs.push(previous.swap_remove(pos)),
                None => {
                    self.attach(folder);
                    added += 1;
                }
            }
        }
        debug!(
            "[VIEW] Backing of {} changed: +{} -{}",
            id,
            added,
            previous.len()
        );
        // Dropping the rest cancels their queries
        drop(previous);
        self.after_membership_change();
    }

    /// Handle every queued event; returns whether anything was processed
    pub fn pump(&mut self) -> bool {
        let mut handled = false;
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
            handled = true;
        }
        handled
    }

    /// Block until the view is open (or closed) or `timeout` passes
    ///
    /// Returns whether the view is open.
    pub fn wait_until_loaded(&mut self, timeout: Duration) -> bool {
        self.pump_until(timeout, |view| {
            !matches!(view.state, ViewState::Opening { .. })
        });
        self.state == ViewState::Open
    }

    /// Handle events until `done` holds or `timeout` passes
    pub fn pump_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while !done(self) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    /// Current version of a displayed message; `None` once it is gone
    pub fn message(&self, reference: &MessageRef) -> Option<Message> {
        self.ctx
            .executor
            .index()
            .get(&reference.id)
            .filter(|m| m.folder == reference.folder && !m.is_deleted)
    }

    pub fn rows(&self) -> &[ViewRow] {
        &self.rows
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    /// Bound target, `None` when closed
    pub fn displayed_target(&self) -> Option<&ViewTarget> {
        self.target.as_ref()
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.target, Some(ViewTarget::Virtual(_)))
    }

    /// Folders currently queried, in backing order
    pub fn underlying_folders(&self) -> Vec<FolderId> {
        self.subs.iter().map(|sub| sub.folder.clone()).collect()
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.sort
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub fn mail_view(&self) -> &MailView {
        &self.mail_view
    }

    fn attach(&mut self, folder: FolderId) {
        let predicate = match &self.target {
            Some(ViewTarget::Virtual(_)) => self
                .predicate
                .clone()
                .and_also(PredicateNode::in_folders([&folder])),
            _ => self.predicate.clone(),
        };
        let handle = self.ctx.executor.execute(
            predicate,
            Scope::Folder(folder.clone()),
            self.tx.clone(),
        );
        self.subs.push(SubQuery {
            folder,
            collection: ObservableCollection::new(handle),
        });
    }

    /// Cancel every sub-query and drop the projected rows
    fn teardown(&mut self) {
        // Dropping a collection cancels its handle
        self.subs.clear();
        self.rows.clear();
    }

    fn handle(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Query(update) => self.handle_query(update),
            ViewEvent::Folder(event) => self.handle_folder(event),
            ViewEvent::Registry(event) => self.handle_registry(event),
        }
    }

    fn handle_registry(&mut self, event: RegistryEvent) {
        if self.target.as_ref() != Some(&ViewTarget::Virtual(event.id().clone())) {
            return;
        }
        debug!("[VIEW] Registry event {:?}", event);
        self.refresh_backing();
    }

    fn handle_query(&mut self, update: QueryUpdate) {
        let Some(sub) = self
            .subs
            .iter_mut()
            .find(|sub| sub.collection.query_id() == update.query)
        else {
            // Late event from a cancelled query
            return;
        };

        let was_complete = sub.collection.is_complete();
        let changed = sub.collection.apply(update.event);
        if !was_complete
            && sub.collection.is_complete()
            && let Some(error) = sub.collection.error()
        {
            warn!("[VIEW] Sub-query for {} failed: {}", sub.folder, error);
        }

        match self.state {
            ViewState::Opening { .. } => self.check_loaded(),
            ViewState::Open if changed => self.reproject(),
            _ => {}
        }
    }

    fn handle_folder(&mut self, event: FolderEvent) {
        match event {
            FolderEvent::Removed(folder) => {
                if self.target == Some(ViewTarget::Folder(folder.clone())) {
                    self.close();
                    return;
                }
                if !self.is_virtual() || !self.subs.iter().any(|sub| sub.folder == folder) {
                    return;
                }
                debug!("[VIEW] Backing folder {} removed", folder);
                self.subs.retain(|sub| sub.folder != folder);
                self.after_membership_change();
            }
            FolderEvent::Renamed { old, new } => {
                if self.target == Some(ViewTarget::Folder(old.clone())) {
                    self.target = Some(ViewTarget::Folder(new.clone()));
                } else if !self.subs.iter().any(|sub| sub.folder == old) {
                    return;
                }
                debug!("[VIEW] Underlying folder {} renamed to {}", old, new);
                let Some(pos) = self.subs.iter().position(|sub| sub.folder == old) else {
                    return;
                };
                self.subs.remove(pos);
                self.attach(new);
                // Keep backing order
                if let Some(sub) = self.subs.pop() {
                    self.subs.insert(pos, sub);
                }
                self.after_membership_change();
            }
            FolderEvent::Added(_) => {}
        }
    }

    /// Close when nothing is left, otherwise continue loading or re-project
    fn after_membership_change(&mut self) {
        if self.subs.is_empty() && self.is_virtual() {
            self.close();
            return;
        }
        match self.state {
            ViewState::Opening { .. } => self.check_loaded(),
            ViewState::Open => self.reproject(),
            ViewState::Closed => {}
        }
    }

    /// Update the completion counter and finish opening once all are done
    fn check_loaded(&mut self) {
        let completed = self
            .subs
            .iter()
            .filter(|sub| sub.collection.is_complete())
            .count();
        let total = self.subs.len();
        self.state = ViewState::Opening { completed, total };
        if completed < total {
            return;
        }

        self.state = ViewState::Open;
        self.rows = self.project();
        if let Some(target) = &self.target {
            info!("[VIEW] Loaded {} with {} rows", target, self.rows.len());
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.all_messages_loaded(&self.rows);
        }
    }

    /// Rebuild rows and tell the listener when open
    fn reproject(&mut self) {
        if self.state != ViewState::Open {
            return;
        }
        self.rows = self.project();
        if let Some(listener) = self.listener.as_mut() {
            listener.rows_changed(&self.rows);
        }
    }

    fn project(&self) -> Vec<ViewRow> {
        let mut seen = HashSet::new();
        let merged = self.messages().filter(|m| seen.insert(m.id.clone()));
        Projection {
            sort: self.sort,
            threaded: self.threaded,
            filter: &self.mail_view,
            collapsed: &self.collapsed,
        }
        .project(merged)
    }

    fn messages(&self) -> impl Iterator<Item = &Message> {
        self.subs.iter().flat_map(|sub| sub.collection.items())
    }

    fn save_folder_prefs(
        &self,
        id: &FolderId,
        edit: impl FnOnce(&mut ViewPrefs),
    ) -> Result<(), ViewError> {
        let mut prefs = self.ctx.prefs.load_view_prefs(id)?.unwrap_or_default();
        edit(&mut prefs);
        self.ctx.prefs.save_view_prefs(id, &prefs)?;
        Ok(())
    }
}

impl Drop for ViewWrapper {
    fn drop(&mut self) {
        self.ctx.folders.remove_observer(self.folder_observer);
        self.ctx.registry.remove_observer(self.registry_observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CombineMode, EmailAddress, Folder, SortKey, SortOrder};
    use crate::predicate::{Leaf, TextField};
    use crate::storage::{InMemoryIndex, MemoryPrefStore};
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Calls {
        loaded: usize,
        changed: usize,
        closed: usize,
    }

    struct Recorder(Arc<Mutex<Calls>>);

    impl ViewListener for Recorder {
        fn all_messages_loaded(&mut self, _rows: &[ViewRow]) {
            self.0.lock().unwrap().loaded += 1;
        }
        fn rows_changed(&mut self, _rows: &[ViewRow]) {
            self.0.lock().unwrap().changed += 1;
        }
        fn closed(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    struct Fixture {
        index: Arc<InMemoryIndex>,
        ctx: ViewContext,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(InMemoryIndex::new());
        index.add_folder(Folder::root("local://", "local"));
        for name in ["inbox", "archive"] {
            index.add_folder(Folder::leaf(format!("local://{name}"), name, "local"));
        }
        for (id, folder, subject) in [
            ("m1", "inbox", "foo one"),
            ("m2", "inbox", "other"),
            ("m3", "archive", "foo two"),
        ] {
            index.add_message(
                Message::builder(MessageId::new(id), FolderId::new(format!("local://{folder}")))
                    .from(EmailAddress::new("a@example.com"))
                    .subject(subject)
                    .build(),
            );
        }

        let prefs: Arc<dyn PrefStore> = Arc::new(MemoryPrefStore::new());
        let registry = VirtualFolderRegistry::open(prefs.clone(), index.clone()).unwrap();
        let ctx = ViewContext {
            executor: QueryExecutor::new(index.clone()),
            folders: index.clone(),
            registry,
            prefs,
            settings: Settings::default(),
        };
        Fixture { index, ctx }
    }

    fn save_foo(ctx: &ViewContext, backing: &[&str]) -> VirtualFolderId {
        ctx.registry
            .create(
                "Foo",
                Leaf::substring(TextField::Subject, "foo").into(),
                CombineMode::And,
                backing.iter().map(|b| FolderId::new(*b)).collect(),
            )
            .unwrap()
    }

    fn wrapper(ctx: &ViewContext) -> (ViewWrapper, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut view = ViewWrapper::new(ctx.clone());
        view.set_listener(Box::new(Recorder(calls.clone())));
        (view, calls)
    }

    #[test]
    fn test_open_real_folder() {
        let f = fixture();
        let (mut view, calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Folder(FolderId::new("local://inbox"))).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        assert_eq!(view.rows().len(), 2);
        assert_eq!(calls.lock().unwrap().loaded, 1);
    }

    #[test]
    fn test_open_virtual_folder_fires_loaded_once() {
        let f = fixture();
        let id = save_foo(&f.ctx, &["local://inbox", "local://archive"]);
        let (mut view, calls) = wrapper(&f.ctx);

        view.open(ViewTarget::Virtual(id)).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        view.pump_until(Duration::from_millis(100), |_| false);

        assert_eq!(view.rows().len(), 2);
        assert_eq!(calls.lock().unwrap().loaded, 1);
        assert!(view.is_virtual());
    }

    #[test]
    fn test_open_orphaned_virtual_folder_fails_without_state_change() {
        let f = fixture();
        let id = save_foo(&f.ctx, &[]);
        let (mut view, _calls) = wrapper(&f.ctx);
        let inbox = ViewTarget::Folder(FolderId::new("local://inbox"));
        view.open(inbox.clone()).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));

        let err = view.open(ViewTarget::Virtual(id)).unwrap_err();
        assert!(matches!(err, ViewError::EmptyVirtualFolder { .. }));
        assert_eq!(view.displayed_target(), Some(&inbox));
        assert_eq!(view.state(), ViewState::Open);
    }

    #[test]
    fn test_reopen_same_target_is_noop() {
        let f = fixture();
        let id = save_foo(&f.ctx, &["local://inbox"]);
        let (mut view, calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Virtual(id.clone())).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        view.set_mail_view(MailView::Unread);

        view.open(ViewTarget::Virtual(id)).unwrap();
        view.pump_until(Duration::from_millis(100), |_| false);
        assert_eq!(calls.lock().unwrap().loaded, 1);
        assert_eq!(view.mail_view(), &MailView::Unread);
    }

    #[test]
    fn test_sort_persisted_for_real_folder() {
        let f = fixture();
        let inbox = FolderId::new("local://inbox");
        let (mut view, _calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Folder(inbox.clone())).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));

        let sort = SortSpec::new(SortKey::Subject, SortOrder::Ascending);
        view.sort(sort).unwrap();
        assert_eq!(view.rows()[0].subject, "foo one");
        assert_eq!(
            f.ctx.prefs.load_view_prefs(&inbox).unwrap().unwrap().sort,
            Some(sort)
        );

        let (mut other, _) = wrapper(&f.ctx);
        other.open(ViewTarget::Folder(inbox)).unwrap();
        assert_eq!(other.sort_spec(), sort);
    }

    #[test]
    fn test_close_notifies_listener() {
        let f = fixture();
        let (mut view, calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Folder(FolderId::new("local://inbox"))).unwrap();
        view.close();
        view.close();
        assert_eq!(calls.lock().unwrap().closed, 1);
        assert!(view.displayed_target().is_none());
        assert!(view.rows().is_empty());
    }

    #[test]
    fn test_root_folder_opens_empty() {
        let f = fixture();
        let (mut view, calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Folder(FolderId::new("local://"))).unwrap();
        assert_eq!(view.state(), ViewState::Open);
        assert!(view.rows().is_empty());
        assert_eq!(calls.lock().unwrap().loaded, 1);
    }

    #[test]
    fn test_unknown_targets() {
        let f = fixture();
        let (mut view, _calls) = wrapper(&f.ctx);
        assert!(matches!(
            view.open(ViewTarget::Folder(FolderId::new("local://nope"))),
            Err(ViewError::UnknownFolder { .. })
        ));
        assert!(matches!(
            view.open(ViewTarget::Virtual(VirtualFolderId::new("vfolder-99"))),
            Err(ViewError::UnknownVirtualFolder { .. })
        ));
        assert_eq!(view.state(), ViewState::Closed);
    }

    #[test]
    fn test_toggle_thread_collapses_replies() {
        let f = fixture();
        f.index.add_message(
            Message::builder(MessageId::new("m4"), FolderId::new("local://inbox"))
                .subject("Re: foo one")
                .build(),
        );
        let (mut view, _calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Folder(FolderId::new("local://inbox"))).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        view.set_threaded(true).unwrap();
        assert_eq!(view.rows().len(), 3);

        view.toggle_thread(&MessageId::new("m1"));
        assert_eq!(view.rows().len(), 2);
        view.toggle_thread(&MessageId::new("m4"));
        assert_eq!(view.rows().len(), 3);
    }

    #[test]
    fn test_stale_message_lookup() {
        let f = fixture();
        let (mut view, _calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Folder(FolderId::new("local://inbox"))).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        let reference = view.rows()[0].reference.clone();
        assert!(view.message(&reference).is_some());

        f.index.remove_message(&reference.id);
        assert!(view.message(&reference).is_none());
    }

    /// Preference store that rejects every write
    struct ReadOnlyPrefs(MemoryPrefStore);

    impl PrefStore for ReadOnlyPrefs {
        fn load_virtual_folders(&self) -> anyhow::Result<Vec<crate::models::VirtualFolder>> {
            self.0.load_virtual_folders()
        }
        fn save_virtual_folder(&self, _folder: &crate::models::VirtualFolder) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }
        fn delete_virtual_folder(&self, _id: &VirtualFolderId) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }
        fn load_view_prefs(&self, folder: &FolderId) -> anyhow::Result<Option<ViewPrefs>> {
            self.0.load_view_prefs(folder)
        }
        fn save_view_prefs(&self, _folder: &FolderId, _prefs: &ViewPrefs) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }
        fn delete_view_prefs(&self, _folder: &FolderId) -> anyhow::Result<()> {
            anyhow::bail!("read-only")
        }
    }

    #[test]
    fn test_failed_persist_keeps_sort_and_rows() {
        let f = fixture();
        let ctx = ViewContext {
            prefs: Arc::new(ReadOnlyPrefs(MemoryPrefStore::new())),
            ..f.ctx.clone()
        };
        let (mut view, calls) = wrapper(&ctx);
        view.open(ViewTarget::Folder(FolderId::new("local://inbox"))).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        let before = view.rows().to_vec();
        let sort = view.sort_spec();

        let subject = SortSpec::new(SortKey::Subject, SortOrder::Ascending);
        assert!(matches!(view.sort(subject), Err(ViewError::Storage(_))));
        assert_eq!(view.sort_spec(), sort);
        assert!(view.set_threaded(true).is_err());
        assert!(!view.is_threaded());
        assert_eq!(view.rows(), before.as_slice());
        assert_eq!(calls.lock().unwrap().changed, 0);
    }

    #[test]
    fn test_sort_on_deleted_virtual_folder_fails_cleanly() {
        let f = fixture();
        let id = save_foo(&f.ctx, &["local://inbox", "local://archive"]);
        let (mut view, calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Virtual(id.clone())).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        let sort = view.sort_spec();

        f.ctx.registry.delete(&id).unwrap();
        // Not pumped yet: the view is still bound
        let err = view.sort(SortSpec::new(SortKey::Subject, SortOrder::Ascending));
        assert!(matches!(err, Err(ViewError::UnknownVirtualFolder { .. })));
        assert_eq!(view.sort_spec(), sort);

        assert!(view.pump_until(TIMEOUT, |v| v.state() == ViewState::Closed));
        assert_eq!(calls.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_backing_edits_reach_open_view() {
        let f = fixture();
        let id = save_foo(&f.ctx, &["local://inbox"]);
        let (mut view, calls) = wrapper(&f.ctx);
        view.open(ViewTarget::Virtual(id.clone())).unwrap();
        assert!(view.wait_until_loaded(TIMEOUT));
        assert_eq!(view.rows().len(), 1);

        f.ctx
            .registry
            .add_backing(&id, &FolderId::new("local://archive"))
            .unwrap();
        assert!(view.pump_until(TIMEOUT, |v| v.rows().len() == 2));

        f.ctx
            .registry
            .remove_backing(&id, &FolderId::new("local://inbox"))
            .unwrap();
        assert!(view.pump_until(TIMEOUT, |v| v.rows().len() == 1));
        assert_eq!(view.underlying_folders(), vec![FolderId::new("local://archive")]);
        assert_eq!(calls.lock().unwrap().loaded, 1);
    }
}
