//! Live result set of one query

use std::collections::HashSet;

use super::executor::{QueryEvent, QueryHandle, QueryId};
use crate::models::{Message, MessageId};
use crate::storage::{IndexError, Scope};

/// Ordered, deduplicated rows matching a predicate at one scope
///
/// Owns the handle keeping the query live; dropping the collection cancels it.
#[derive(Debug)]
pub struct ObservableCollection {
    handle: QueryHandle,
    items: Vec<Message>,
    ids: HashSet<MessageId>,
    complete: bool,
    error: Option<IndexError>,
}

impl ObservableCollection {
    pub fn new(handle: QueryHandle) -> Self {
        Self {
            handle,
            items: Vec::new(),
            ids: HashSet::new(),
            complete: false,
            error: None,
        }
    }

    pub fn query_id(&self) -> QueryId {
        self.handle.id()
    }

    pub fn scope(&self) -> &Scope {
        self.handle.scope()
    }

    /// Apply one event; returns whether the visible rows changed
    pub fn apply(&mut self, event: QueryEvent) -> bool {
        match event {
            QueryEvent::Added(batch) => {
                let before = self.items.len();
                for message in batch {
                    if self.ids.insert(message.id.clone()) {
                        self.items.push(message);
                    }
                }
                self.items.len() != before
            }
            QueryEvent::Modified(message) => {
                match self.items.iter_mut().find(|m| m.id == message.id) {
                    Some(slot) => {
                        *slot = message;
                        true
                    }
                    None => false,
                }
            }
            QueryEvent::Removed(reference) => {
                if !self.ids.remove(&reference.id) {
                    return false;
                }
                self.items.retain(|m| m.id != reference.id);
                true
            }
            QueryEvent::Completed { error } => {
                self.complete = true;
                self.error = error;
                true
            }
        }
    }

    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Whether the initial scan has finished
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Error reported at completion; the collection is then empty
    pub fn error(&self) -> Option<&IndexError> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, Folder, FolderId};
    use crate::predicate::PredicateNode;
    use crate::query::{QueryExecutor, QueryUpdate};
    use crate::storage::InMemoryIndex;
    use std::sync::Arc;
    use std::sync::mpsc;

    fn collection() -> ObservableCollection {
        let index = Arc::new(InMemoryIndex::new());
        index.add_folder(Folder::leaf("local://inbox", "Inbox", "local"));
        let executor = QueryExecutor::new(index);
        let (tx, _rx) = mpsc::channel::<QueryUpdate>();
        ObservableCollection::new(executor.execute(PredicateNode::all(), Scope::Global, tx))
    }

    fn message(id: &str) -> Message {
        Message::builder(MessageId::new(id), FolderId::new("local://inbox"))
            .from(EmailAddress::new("a@example.com"))
            .subject("hello")
            .build()
    }

    #[test]
    fn test_added_is_deduplicated() {
        let mut c = collection();
        assert!(c.apply(QueryEvent::Added(vec![message("m1"), message("m2")])));
        assert!(!c.apply(QueryEvent::Added(vec![message("m1")])));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_modified_and_removed() {
        let mut c = collection();
        c.apply(QueryEvent::Added(vec![message("m1")]));

        let mut read = message("m1");
        read.is_unread = false;
        assert!(c.apply(QueryEvent::Modified(read)));
        assert!(!c.items()[0].is_unread);

        assert!(c.apply(QueryEvent::Removed(message("m1").reference())));
        assert!(c.is_empty());
        assert!(!c.apply(QueryEvent::Removed(message("m1").reference())));
    }

    #[test]
    fn test_completion_with_error() {
        let mut c = collection();
        assert!(!c.is_complete());
        c.apply(QueryEvent::Completed {
            error: Some(IndexError::ScopeUnavailable {
                scope: "global".to_string(),
            }),
        });
        assert!(c.is_complete());
        assert!(c.error().is_some());
        assert!(c.is_empty());
    }
}
