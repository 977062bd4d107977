//! Asynchronous predicate execution with live membership updates
//!
//! `QueryExecutor::execute` returns immediately. A worker thread subscribes to
//! index mutations, scans the index, streams matches in batches and then
//! keeps the result set live until its `QueryHandle` is cancelled or dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use log::{debug, warn};

use crate::models::{Message, MessageId, MessageRef};
use crate::predicate::PredicateNode;
use crate::storage::{IndexError, IndexEvent, MessageIndex, Scope, SubscriptionId};

/// Matches delivered per `Added` event during the initial scan
const BATCH_SIZE: usize = 256;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one running query; every event it emits carries this id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    fn next() -> Self {
        Self(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Change to a query's result set
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// New members, in index order
    Added(Vec<Message>),
    /// A member changed but still matches
    Modified(Message),
    /// A member left the result set
    Removed(MessageRef),
    /// Initial scan finished; sent exactly once per query
    Completed { error: Option<IndexError> },
}

/// A `QueryEvent` tagged with the query it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct QueryUpdate {
    pub query: QueryId,
    pub event: QueryEvent,
}

/// Keeps a query live; cancels it when dropped
pub struct QueryHandle {
    id: QueryId,
    scope: Scope,
    cancelled: Arc<AtomicBool>,
    index: Arc<dyn MessageIndex>,
    subscription: SubscriptionId,
}

impl QueryHandle {
    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop the query
    ///
    /// The index subscription is dropped before this returns. Events already
    /// queued for this id must be discarded by the owner.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("[QUERY] Cancelling {} over {}", self.id, self.scope);
            self.index.unsubscribe(self.subscription);
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Runs predicates against a message index
#[derive(Clone)]
pub struct QueryExecutor {
    index: Arc<dyn MessageIndex>,
}

impl QueryExecutor {
    pub fn new(index: Arc<dyn MessageIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<dyn MessageIndex> {
        &self.index
    }

    /// Start evaluating `predicate` at `scope`
    ///
    /// Updates are sent to `sink` converted into the owner's event type. The
    /// query runs until the returned handle is cancelled or dropped, or until
    /// `sink` is disconnected.
    pub fn execute<T>(&self, predicate: PredicateNode, scope: Scope, sink: Sender<T>) -> QueryHandle
    where
        T: From<QueryUpdate> + Send + 'static,
    {
        let id = QueryId::next();
        let cancelled = Arc::new(AtomicBool::new(false));

        // Subscribe before scanning so no mutation falls between the two
        let (tx, rx) = mpsc::channel();
        let subscription = self.index.subscribe(scope.clone(), tx);

        let fallback = sink.clone();
        let worker = Worker {
            id,
            predicate,
            scope: scope.clone(),
            index: Arc::clone(&self.index),
            cancelled: Arc::clone(&cancelled),
            subscription,
            members: HashSet::new(),
            sink,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("query-{}", id.0))
            .spawn(move || worker.run(rx));

        match spawned {
            Ok(_) => debug!("[QUERY] Started {} over {}", id, scope),
            Err(e) => {
                warn!("[QUERY] Failed to spawn worker for {}: {}", id, e);
                self.index.unsubscribe(subscription);
                let update = QueryUpdate {
                    query: id,
                    event: QueryEvent::Completed {
                        error: Some(IndexError::ScopeUnavailable {
                            scope: scope.to_string(),
                        }),
                    },
                };
                let _ = fallback.send(T::from(update));
            }
        }

        QueryHandle {
            id,
            scope,
            cancelled,
            index: Arc::clone(&self.index),
            subscription,
        }
    }
}

/// State owned by one query worker thread
struct Worker<T> {
    id: QueryId,
    predicate: PredicateNode,
    scope: Scope,
    index: Arc<dyn MessageIndex>,
    cancelled: Arc<AtomicBool>,
    subscription: SubscriptionId,
    members: HashSet<MessageId>,
    sink: Sender<T>,
}

impl<T: From<QueryUpdate>> Worker<T> {
    fn run(mut self, rx: Receiver<IndexEvent>) {
        if self.scan().is_err() {
            return self.stop();
        }

        // Ends once the subscription is dropped by cancel()
        while let Ok(event) = rx.recv() {
            if self.is_cancelled() {
                break;
            }
            if let Some(update) = self.membership_change(event)
                && self.send(update).is_err()
            {
                break;
            }
        }
        self.stop();
    }

    /// Initial scan; `Err` means the owner is gone or the query was cancelled
    fn scan(&mut self) -> Result<(), ()> {
        let error = match self.index.query(&self.predicate, &self.scope) {
            Ok(matches) => {
                debug!("[QUERY] {} scanned {} matches", self.id, matches.len());
                for batch in matches.chunks(BATCH_SIZE) {
                    if self.is_cancelled() {
                        return Err(());
                    }
                    let fresh: Vec<Message> = batch
                        .iter()
                        .filter(|m| self.members.insert(m.id.clone()))
                        .cloned()
                        .collect();
                    if !fresh.is_empty() {
                        self.send(QueryEvent::Added(fresh))?;
                    }
                }
                None
            }
            Err(e) => {
                warn!("[QUERY] {} failed: {}", self.id, e);
                Some(e)
            }
        };

        if self.is_cancelled() {
            return Err(());
        }
        self.send(QueryEvent::Completed { error })
    }

    /// Translate an index mutation into a result set change, if any
    fn membership_change(&mut self, event: IndexEvent) -> Option<QueryEvent> {
        match event {
            IndexEvent::Added(message) | IndexEvent::Modified(message) => {
                let matches = !message.is_deleted && self.predicate.matches(&message);
                match (matches, self.members.contains(&message.id)) {
                    (true, true) => Some(QueryEvent::Modified(message)),
                    (true, false) => {
                        self.members.insert(message.id.clone());
                        Some(QueryEvent::Added(vec![message]))
                    }
                    (false, true) => {
                        self.members.remove(&message.id);
                        Some(QueryEvent::Removed(message.reference()))
                    }
                    (false, false) => None,
                }
            }
            IndexEvent::Removed(reference) => self
                .members
                .remove(&reference.id)
                .then_some(QueryEvent::Removed(reference)),
        }
    }

    fn send(&self, event: QueryEvent) -> Result<(), ()> {
        let update = QueryUpdate {
            query: self.id,
            event,
        };
        self.sink.send(T::from(update)).map_err(|_| ())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn stop(self) {
        self.index.unsubscribe(self.subscription);
        debug!("[QUERY] Worker for {} stopped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, Folder, FolderId};
    use crate::predicate::{Leaf, TextField};
    use crate::storage::InMemoryIndex;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        index.add_folder(Folder::root("local://", "local"));
        index.add_folder(Folder::leaf("local://inbox", "Inbox", "local"));
        index
    }

    fn message(id: &str, subject: &str) -> Message {
        Message::builder(MessageId::new(id), FolderId::new("local://inbox"))
            .from(EmailAddress::new("a@example.com"))
            .subject(subject)
            .build()
    }

    fn foo() -> PredicateNode {
        Leaf::substring(TextField::Subject, "foo").into()
    }

    /// Collect events until the initial scan completes
    fn initial(rx: &Receiver<QueryUpdate>) -> (Vec<Message>, Option<IndexError>) {
        let mut added = Vec::new();
        loop {
            let update = rx.recv_timeout(TIMEOUT).unwrap();
            match update.event {
                QueryEvent::Added(batch) => added.extend(batch),
                QueryEvent::Completed { error } => return (added, error),
                other => panic!("unexpected event before completion: {:?}", other),
            }
        }
    }

    #[test]
    fn test_initial_scan_then_completed() {
        let index = setup();
        index.add_message(message("m1", "foo"));
        index.add_message(message("m2", "bar"));

        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let _handle = executor.execute(foo(), Scope::Global, tx);

        let (added, error) = initial(&rx);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id.as_str(), "m1");
        assert!(error.is_none());
    }

    #[test]
    fn test_empty_result_still_completes() {
        let index = setup();
        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let handle = executor.execute(foo(), Scope::Global, tx);

        let update = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(update.query, handle.id());
        assert_eq!(update.event, QueryEvent::Completed { error: None });
    }

    #[test]
    fn test_unavailable_scope_completes_with_error() {
        let index = setup();
        index.add_message(message("m1", "foo"));
        index.set_offline(true);

        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let _handle = executor.execute(foo(), Scope::Global, tx);

        let (added, error) = initial(&rx);
        assert!(added.is_empty());
        assert!(matches!(error, Some(IndexError::ScopeUnavailable { .. })));
    }

    #[test]
    fn test_live_membership_changes() {
        let index = setup();
        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let _handle = executor.execute(foo(), Scope::Global, tx);
        initial(&rx);

        index.add_message(message("m1", "foo"));
        let event = rx.recv_timeout(TIMEOUT).unwrap().event;
        assert!(matches!(event, QueryEvent::Added(ref batch) if batch.len() == 1));

        index.set_unread(&MessageId::new("m1"), false);
        let event = rx.recv_timeout(TIMEOUT).unwrap().event;
        assert!(matches!(event, QueryEvent::Modified(ref m) if !m.is_unread));

        // Edited so it no longer matches
        index.update_message(&MessageId::new("m1"), |m| m.subject = "bar".to_string());
        let event = rx.recv_timeout(TIMEOUT).unwrap().event;
        assert!(matches!(event, QueryEvent::Removed(ref r) if r.id.as_str() == "m1"));

        // Non-members are not reported
        index.add_message(message("m2", "bar"));
        index.remove_message(&MessageId::new("m2"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_deleted_flag_removes_member() {
        let index = setup();
        index.add_message(message("m1", "foo"));
        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let _handle = executor.execute(foo(), Scope::Global, tx);
        initial(&rx);

        index.set_deleted(&MessageId::new("m1"), true);
        let event = rx.recv_timeout(TIMEOUT).unwrap().event;
        assert!(matches!(event, QueryEvent::Removed(_)));
    }

    #[test]
    fn test_cancel_stops_updates() {
        let index = setup();
        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let handle = executor.execute(foo(), Scope::Global, tx);
        initial(&rx);

        handle.cancel();
        assert!(handle.is_cancelled());
        index.add_message(message("m1", "foo"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_drop_cancels() {
        let index = setup();
        let executor = QueryExecutor::new(index.clone());
        let (tx, rx) = mpsc::channel::<QueryUpdate>();
        let handle = executor.execute(foo(), Scope::Global, tx);
        initial(&rx);
        drop(handle);

        index.add_message(message("m1", "foo"));
        // Worker exits and drops the sink
        loop {
            match rx.recv_timeout(TIMEOUT) {
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => panic!("worker still running"),
                Ok(update) => panic!("event after drop: {:?}", update),
            }
        }
    }
}
