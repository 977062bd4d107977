//! Predicate tree evaluated against indexed message rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FolderId, Message};

/// Every field the index can match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Subject,
    Sender,
    Recipients,
    Body,
    Date,
    AttachmentName,
    HasAttachment,
    Folder,
    Unread,
}

/// Fields that support substring matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Subject,
    Sender,
    Recipients,
    Body,
    AttachmentName,
}

impl TextField {
    pub fn field(self) -> Field {
        match self {
            TextField::Subject => Field::Subject,
            TextField::Sender => Field::Sender,
            TextField::Recipients => Field::Recipients,
            TextField::Body => Field::Body,
            TextField::AttachmentName => Field::AttachmentName,
        }
    }

    /// Whether any text of this field on `message` contains `needle_lower`
    fn contains(self, message: &Message, needle_lower: &str) -> bool {
        match self {
            TextField::Subject => contains_ci(&message.subject, needle_lower),
            TextField::Sender => contains_ci(&message.sender_text(), needle_lower),
            TextField::Recipients => contains_ci(&message.recipients_text(), needle_lower),
            TextField::Body => contains_ci(&message.body, needle_lower),
            TextField::AttachmentName => message
                .attachment_names
                .iter()
                .any(|name| contains_ci(name, needle_lower)),
        }
    }
}

/// Leaf operator kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Substring,
    DateBefore,
    DateAfter,
    Equals,
}

/// Value side of an equality leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum EqualsTerm {
    HasAttachment(bool),
    Folder(FolderId),
    Unread(bool),
}

/// A `(field, operator, value)` leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Leaf {
    /// Case-insensitive substring match on a text field
    Substring { field: TextField, needle: String },
    /// `date <= at`
    DateBefore { at: DateTime<Utc> },
    /// `date >= at`
    DateAfter { at: DateTime<Utc> },
    Equals { term: EqualsTerm },
}

impl Leaf {
    pub fn substring(field: TextField, needle: impl Into<String>) -> Self {
        Leaf::Substring {
            field,
            needle: needle.into(),
        }
    }

    pub fn field(&self) -> Field {
        match self {
            Leaf::Substring { field, .. } => field.field(),
            Leaf::DateBefore { .. } | Leaf::DateAfter { .. } => Field::Date,
            Leaf::Equals { term } => match term {
                EqualsTerm::HasAttachment(_) => Field::HasAttachment,
                EqualsTerm::Folder(_) => Field::Folder,
                EqualsTerm::Unread(_) => Field::Unread,
            },
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Leaf::Substring { .. } => Operator::Substring,
            Leaf::DateBefore { .. } => Operator::DateBefore,
            Leaf::DateAfter { .. } => Operator::DateAfter,
            Leaf::Equals { .. } => Operator::Equals,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Leaf::Substring { field, needle } => field.contains(message, &needle.to_lowercase()),
            Leaf::DateBefore { at } => message.date <= *at,
            Leaf::DateAfter { at } => message.date >= *at,
            Leaf::Equals { term } => match term {
                EqualsTerm::HasAttachment(expected) => message.has_attachments() == *expected,
                EqualsTerm::Folder(folder) => &message.folder == folder,
                EqualsTerm::Unread(expected) => message.is_unread == *expected,
            },
        }
    }
}

/// Boolean predicate tree
///
/// `And([])` matches every message; `Or([])` matches none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateNode {
    Leaf(Leaf),
    And(Vec<PredicateNode>),
    Or(Vec<PredicateNode>),
}

impl Default for PredicateNode {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Leaf> for PredicateNode {
    fn from(leaf: Leaf) -> Self {
        PredicateNode::Leaf(leaf)
    }
}

impl PredicateNode {
    /// Predicate matching everything
    pub fn all() -> Self {
        PredicateNode::And(Vec::new())
    }

    /// Membership in any of `folders`
    pub fn in_folders<'a>(folders: impl IntoIterator<Item = &'a FolderId>) -> Self {
        PredicateNode::Or(
            folders
                .into_iter()
                .map(|f| {
                    PredicateNode::Leaf(Leaf::Equals {
                        term: EqualsTerm::Folder(f.clone()),
                    })
                })
                .collect(),
        )
    }

    /// Whether this is the empty conjunction
    pub fn is_match_all(&self) -> bool {
        matches!(self, PredicateNode::And(children) if children.is_empty())
    }

    /// Top-level clauses: the children of a root `And`, otherwise the node itself
    pub fn clauses(&self) -> Vec<PredicateNode> {
        match self {
            PredicateNode::And(children) => children.clone(),
            other => vec![other.clone()],
        }
    }

    /// Conjunction of two predicates, skipping a match-all side
    pub fn and_also(self, other: PredicateNode) -> Self {
        if self.is_match_all() {
            return other;
        }
        if other.is_match_all() {
            return self;
        }
        match self {
            PredicateNode::And(mut children) => {
                children.push(other);
                PredicateNode::And(children)
            }
            node => PredicateNode::And(vec![node, other]),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            PredicateNode::Leaf(leaf) => leaf.matches(message),
            PredicateNode::And(children) => children.iter().all(|c| c.matches(message)),
            PredicateNode::Or(children) => children.iter().any(|c| c.matches(message)),
        }
    }

    /// Visit every leaf in the tree
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            PredicateNode::Leaf(leaf) => out.push(leaf),
            PredicateNode::And(children) | PredicateNode::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, MessageId};
    use chrono::TimeZone;

    fn sample() -> Message {
        Message::builder(MessageId::new("m1"), FolderId::new("local/inbox"))
            .from(EmailAddress::with_name("Barbara Stone", "bstone@example.com"))
            .to(vec![EmailAddress::new("team@example.com")])
            .subject("Weekly FOO report")
            .body("numbers attached")
            .date(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap())
            .attachment("report.pdf")
            .build()
    }

    #[test]
    fn test_empty_and_matches_everything() {
        assert!(PredicateNode::all().matches(&sample()));
        assert!(PredicateNode::all().is_match_all());
    }

    #[test]
    fn test_empty_or_matches_nothing() {
        assert!(!PredicateNode::Or(Vec::new()).matches(&sample()));
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        let leaf = Leaf::substring(TextField::Subject, "foo");
        assert!(leaf.matches(&sample()));
        let leaf = Leaf::substring(TextField::Sender, "BAR");
        assert!(leaf.matches(&sample()));
    }

    #[test]
    fn test_date_bounds_inclusive() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert!(Leaf::DateAfter { at }.matches(&sample()));
        assert!(Leaf::DateBefore { at }.matches(&sample()));
        let later = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        assert!(!Leaf::DateAfter { at: later }.matches(&sample()));
    }

    #[test]
    fn test_attachment_terms() {
        let has = Leaf::Equals {
            term: EqualsTerm::HasAttachment(true),
        };
        let named = Leaf::substring(TextField::AttachmentName, "REPORT");
        assert!(has.matches(&sample()));
        assert!(named.matches(&sample()));
        assert_eq!(named.field(), Field::AttachmentName);
        assert_eq!(named.operator(), Operator::Substring);
    }

    #[test]
    fn test_folder_membership() {
        let inbox = FolderId::new("local/inbox");
        let trash = FolderId::new("local/trash");
        assert!(PredicateNode::in_folders([&inbox]).matches(&sample()));
        assert!(!PredicateNode::in_folders([&trash]).matches(&sample()));
    }

    #[test]
    fn test_and_also_skips_match_all() {
        let leaf: PredicateNode = Leaf::substring(TextField::Subject, "foo").into();
        assert_eq!(PredicateNode::all().and_also(leaf.clone()), leaf);
        let combined = leaf.clone().and_also(leaf.clone());
        assert_eq!(combined.clauses().len(), 2);
    }

    #[test]
    fn test_serde_shape() {
        let node = PredicateNode::And(vec![Leaf::substring(TextField::Subject, "foo").into()]);
        let json = serde_json::to_string(&node).unwrap();
        let back: PredicateNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
        assert!(json.contains("\"substring\""));
    }
}
