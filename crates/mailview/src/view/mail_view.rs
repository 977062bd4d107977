//! Secondary filters layered over an open view

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::Message;

/// In-memory filter applied on top of the bound target's rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailView {
    #[default]
    All,
    Unread,
    Read,
    /// Messages carrying a user tag (case-insensitive)
    Tagged(String),
}

impl MailView {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MailView::All => true,
            MailView::Unread => message.is_unread,
            MailView::Read => !message.is_unread,
            MailView::Tagged(tag) => message.has_tag(tag),
        }
    }
}

impl FromStr for MailView {
    type Err = String;

    /// Parses `all`, `unread`, `read` or `tag:<name>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(MailView::All),
            "unread" => Ok(MailView::Unread),
            "read" => Ok(MailView::Read),
            other => match other.strip_prefix("tag:") {
                Some(tag) if !tag.is_empty() => Ok(MailView::Tagged(tag.to_string())),
                _ => Err(format!("unknown mail view: {s}")),
            },
        }
    }
}
