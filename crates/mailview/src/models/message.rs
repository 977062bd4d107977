//! Message model representing one indexed message row

use super::FolderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an indexed message
///
/// Assigned when the index first sees the message and never reused for a
/// different message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A reference to an indexed message and the folder it currently lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: MessageId,
    pub folder: FolderId,
}

impl MessageRef {
    pub fn new(id: MessageId, folder: FolderId) -> Self {
        Self { id, folder }
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// A single indexed message
///
/// This is the row the index evaluates predicates against. Only the fields
/// the index can match on are kept; full MIME content stays in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable message ID
    pub id: MessageId,
    /// Folder currently holding the message
    pub folder: FolderId,
    /// Sender's email address
    pub from: EmailAddress,
    /// Recipients (To field)
    pub to: Vec<EmailAddress>,
    /// CC recipients
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    /// Subject line
    pub subject: String,
    /// Plain text body
    #[serde(default)]
    pub body: String,
    /// Date header (falls back to arrival time)
    pub date: DateTime<Utc>,
    /// File names of attachments, empty when there are none
    #[serde(default)]
    pub attachment_names: Vec<String>,
    /// Whether the message has not been read yet
    #[serde(default)]
    pub is_unread: bool,
    /// User tags (keywords)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Marked deleted but not yet expunged
    #[serde(default)]
    pub is_deleted: bool,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, folder: FolderId) -> MessageBuilder {
        MessageBuilder::new(id, folder)
    }

    /// Reference to this message in its current folder
    pub fn reference(&self) -> MessageRef {
        MessageRef::new(self.id.clone(), self.folder.clone())
    }

    /// Sender formatted the way substring matching sees it
    pub fn sender_text(&self) -> String {
        self.from.display()
    }

    /// All recipients (To + CC) joined for substring matching
    pub fn recipients_text(&self) -> String {
        self.to
            .iter()
            .chain(self.cc.iter())
            .map(EmailAddress::display)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachment_names.is_empty()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    folder: FolderId,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    subject: String,
    body: String,
    date: Option<DateTime<Utc>>,
    attachment_names: Vec<String>,
    is_unread: bool,
    tags: Vec<String>,
}

impl MessageBuilder {
    fn new(id: MessageId, folder: FolderId) -> Self {
        Self {
            id,
            folder,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            date: None,
            attachment_names: Vec::new(),
            is_unread: true,
            tags: Vec::new(),
        }
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn attachment(mut self, name: impl Into<String>) -> Self {
        self.attachment_names.push(name.into());
        self
    }

    pub fn unread(mut self, is_unread: bool) -> Self {
        self.is_unread = is_unread;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            folder: self.folder,
            from: self
                .from
                .unwrap_or_else(|| EmailAddress::new("unknown@unknown.invalid")),
            to: self.to,
            cc: self.cc,
            subject: self.subject,
            body: self.body,
            date: self.date.unwrap_or_else(Utc::now),
            attachment_names: self.attachment_names,
            is_unread: self.is_unread,
            tags: self.tags,
            is_deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email_with_name() {
        let addr = EmailAddress::parse("John Doe <john@example.com>");
        assert_eq!(addr.name, Some("John Doe".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_with_angle_brackets_no_name() {
        let addr = EmailAddress::parse("<john@example.com>");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_display_with_name() {
        let addr = EmailAddress::with_name("John Doe", "john@example.com");
        assert_eq!(addr.display(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_recipients_text_includes_cc() {
        let msg = Message::builder(MessageId::new("m1"), FolderId::new("local/inbox"))
            .to(vec![EmailAddress::new("a@example.com")])
            .cc(vec![EmailAddress::with_name("Bee", "b@example.com")])
            .build();

        assert_eq!(msg.recipients_text(), "a@example.com, Bee <b@example.com>");
    }

    #[test]
    fn test_builder_defaults() {
        let msg = Message::builder(MessageId::new("m1"), FolderId::new("local/inbox")).build();
        assert!(msg.is_unread);
        assert!(!msg.is_deleted);
        assert!(!msg.has_attachments());
        assert_eq!(msg.reference().folder.as_str(), "local/inbox");
    }
}
