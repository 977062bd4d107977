//! Row projection: sorting, threading and secondary filtering
//!
//! Turns the merged live collections of a view into the ordered rows shown
//! by the list. Threads group messages by normalized subject; each thread
//! is placed by its root (earliest) message.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::mail_view::MailView;
use crate::models::{Message, MessageRef, SortKey, SortOrder, SortSpec};

/// Reply and forward markers stripped when grouping threads
const SUBJECT_PREFIXES: &[&str] = &["re:", "fwd:", "fw:", "aw:"];

/// One displayed row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRow {
    pub reference: MessageRef,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub unread: bool,
    /// 0 for flat rows and thread roots, 1 for replies
    pub depth: usize,
    /// Messages in the thread, on the root row only; 0 elsewhere
    pub thread_size: usize,
}

impl ViewRow {
    fn new(message: &Message, depth: usize, thread_size: usize) -> Self {
        Self {
            reference: message.reference(),
            subject: message.subject.clone(),
            sender: message.from.display(),
            date: message.date,
            unread: message.is_unread,
            depth,
            thread_size,
        }
    }
}

/// How the merged collection is turned into rows
#[derive(Debug, Clone, Copy)]
pub struct Projection<'a> {
    pub sort: SortSpec,
    pub threaded: bool,
    pub filter: &'a MailView,
    /// Thread keys whose replies are hidden
    pub collapsed: &'a HashSet<String>,
}

impl Projection<'_> {
    pub fn project<'m>(&self, messages: impl IntoIterator<Item = &'m Message>) -> Vec<ViewRow> {
        let mut visible: Vec<&Message> = messages
            .into_iter()
            .filter(|m| !m.is_deleted && self.filter.matches(m))
            .collect();

        if !self.threaded {
            sort_messages(&mut visible, self.sort);
            return visible.into_iter().map(|m| ViewRow::new(m, 0, 0)).collect();
        }

        let mut threads: HashMap<String, Vec<&Message>> = HashMap::new();
        for message in visible {
            threads
                .entry(thread_key(&message.subject))
                .or_default()
                .push(message);
        }

        let mut threads: Vec<(String, Vec<&Message>)> = threads.into_iter().collect();
        for (_, members) in &mut threads {
            members.sort_by(|a, b| by_date(a, b));
        }
        threads.sort_by(|(_, a), (_, b)| compare(a[0], b[0], self.sort));

        let mut rows = Vec::new();
        for (key, members) in threads {
            rows.push(ViewRow::new(members[0], 0, members.len()));
            if !self.collapsed.contains(&key) {
                rows.extend(members[1..].iter().map(|m| ViewRow::new(m, 1, 0)));
            }
        }
        rows
    }
}

/// Key grouping a message into its thread
pub fn thread_key(subject: &str) -> String {
    let mut rest = subject.trim();
    'strip: loop {
        for prefix in SUBJECT_PREFIXES {
            if rest.len() >= prefix.len()
                && rest.is_char_boundary(prefix.len())
                && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                rest = rest[prefix.len()..].trim_start();
                continue 'strip;
            }
        }
        break;
    }
    rest.to_lowercase()
}

pub fn sort_messages(messages: &mut [&Message], sort: SortSpec) {
    messages.sort_by(|a, b| compare(a, b, sort));
}

fn compare(a: &Message, b: &Message, sort: SortSpec) -> Ordering {
    let primary = match sort.key {
        SortKey::Date => Ordering::Equal,
        SortKey::Subject => a.subject.to_lowercase().cmp(&b.subject.to_lowercase()),
        SortKey::Sender => a
            .sender_text()
            .to_lowercase()
            .cmp(&b.sender_text().to_lowercase()),
        SortKey::Recipients => a
            .recipients_text()
            .to_lowercase()
            .cmp(&b.recipients_text().to_lowercase()),
        SortKey::Unread => a.is_unread.cmp(&b.is_unread),
        SortKey::Folder => a.folder.cmp(&b.folder),
    };
    let ordering = primary.then_with(|| by_date(a, b));
    match sort.order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

fn by_date(a: &Message, b: &Message) -> Ordering {
    a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id))
}
