//! Builds a predicate tree from the fields of an advanced search form
//!
//! Every populated text box is split into keywords that must all match
//! ("match all words in this field"). The free-text box fans out to subject,
//! sender, recipients and body: all words must match inside one of those fields.
//! Attachment and date criteria become independent leaves, and everything is
//! joined by a top-level AND.
//!
//! Building never fails. Empty criteria produce `And([])`, which matches every
//! message.

use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::node::{EqualsTerm, Leaf, PredicateNode, TextField};

/// Attachment constraint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentFilter {
    #[default]
    Any,
    /// Has at least one attachment, optionally with a name containing the text
    With { name: Option<String> },
    Without,
}

/// Date range constraint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    #[default]
    Unlimited,
    /// Today and the `n - 1` days before it
    LastDays(u32),
    /// Whole calendar days from `from` through `to`
    Custom { from: NaiveDate, to: NaiveDate },
}

/// Raw criteria as entered in the search form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    /// Matches subject, sender, recipients or body
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub attachment: AttachmentFilter,
    #[serde(default)]
    pub date_range: DateRange,
}

/// Keywords per field, kept for highlighting matches in the view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchKeys {
    pub subject: Vec<String>,
    pub sender: Vec<String>,
    pub recipient: Vec<String>,
    pub body: Vec<String>,
}

impl MatchKeys {
    pub fn is_empty(&self) -> bool {
        self.subject.is_empty()
            && self.sender.is_empty()
            && self.recipient.is_empty()
            && self.body.is_empty()
    }
}

/// Result of [`build`]: the predicate plus its highlight keywords
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub predicate: PredicateNode,
    pub match_keys: MatchKeys,
}

/// Build a predicate using the local clock for relative date ranges
pub fn build(criteria: &SearchCriteria) -> BuiltQuery {
    build_at(criteria, &Local::now())
}

/// Build a predicate resolving relative date ranges against `now`
///
/// Day boundaries are computed in `now`'s time zone. The resolved instants are
/// frozen into the predicate.
pub fn build_at<Tz: TimeZone>(criteria: &SearchCriteria, now: &DateTime<Tz>) -> BuiltQuery {
    let mut clauses: Vec<PredicateNode> = Vec::new();
    let mut keys = MatchKeys::default();

    let subject = split_to_compact_words(&criteria.subject);
    if !subject.is_empty() {
        clauses.push(fuzzy_match(&[TextField::Subject], &subject));
        keys.subject = subject;
    }

    let sender = split_to_compact_words(&criteria.sender);
    if !sender.is_empty() {
        clauses.push(fuzzy_match(&[TextField::Sender], &sender));
        keys.sender = sender;
    }

    let recipient = split_to_compact_words(&criteria.recipient);
    if !recipient.is_empty() {
        clauses.push(fuzzy_match(&[TextField::Recipients], &recipient));
        keys.recipient = recipient;
    }

    let full_text = split_to_compact_words(&criteria.full_text);
    if !full_text.is_empty() {
        clauses.push(fuzzy_match(
            &[
                TextField::Subject,
                TextField::Sender,
                TextField::Recipients,
                TextField::Body,
            ],
            &full_text,
        ));
        keys.subject.extend(full_text.iter().cloned());
        keys.sender.extend(full_text.iter().cloned());
        keys.recipient.extend(full_text.iter().cloned());
        keys.body = full_text;
    }

    match &criteria.attachment {
        AttachmentFilter::Any => {}
        AttachmentFilter::With { name } => {
            let name = name.as_deref().map(str::trim).unwrap_or_default();
            if name.is_empty() {
                clauses.push(equals(EqualsTerm::HasAttachment(true)));
            } else {
                clauses.push(Leaf::substring(TextField::AttachmentName, name).into());
            }
        }
        AttachmentFilter::Without => clauses.push(equals(EqualsTerm::HasAttachment(false))),
    }

    let tz = now.timezone();
    match criteria.date_range {
        DateRange::Unlimited => {}
        DateRange::LastDays(days) => {
            let days_before = u64::from(days.max(1) - 1);
            let today = now.date_naive();
            let first = today.checked_sub_days(Days::new(days_before)).unwrap_or(today);
            clauses.push(Leaf::DateAfter { at: start_of_day(&tz, first) }.into());
        }
        DateRange::Custom { from, to } => {
            let to = if from > to { from } else { to };
            clauses.push(Leaf::DateAfter { at: start_of_day(&tz, from) }.into());
            clauses.push(Leaf::DateBefore { at: end_of_day(&tz, to) }.into());
        }
    }

    BuiltQuery {
        predicate: PredicateNode::And(clauses),
        match_keys: keys,
    }
}

/// Split text on whitespace, dropping empty words
pub fn split_to_compact_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// All `keys` must match within one of `fields`
fn fuzzy_match(fields: &[TextField], keys: &[String]) -> PredicateNode {
    let mut per_field: Vec<PredicateNode> = fields
        .iter()
        .map(|&field| {
            PredicateNode::And(
                keys.iter()
                    .map(|k| Leaf::substring(field, k.clone()).into())
                    .collect(),
            )
        })
        .collect();

    if per_field.len() == 1 {
        per_field.remove(0)
    } else {
        PredicateNode::Or(per_field)
    }
}

fn equals(term: EqualsTerm) -> PredicateNode {
    Leaf::Equals { term }.into()
}

fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    resolve_local(tz, date.and_time(NaiveTime::MIN))
}

fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    resolve_local(tz, date.and_time(last_second))
}

/// Interpret a wall-clock time in `tz`; times skipped by a DST jump are read as UTC
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, FolderId, Message, MessageId};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 14, 30, 0).unwrap()
    }

    fn message(subject: &str, from: &str) -> Message {
        Message::builder(MessageId::new("m"), FolderId::new("local/inbox"))
            .from(EmailAddress::parse(from))
            .subject(subject)
            .date(Utc.with_ymd_and_hms(2024, 6, 14, 9, 0, 0).unwrap())
            .build()
    }

    #[test]
    fn test_empty_criteria_match_everything() {
        let built = build_at(&SearchCriteria::default(), &now());
        assert!(built.predicate.is_match_all());
        assert!(built.match_keys.is_empty());
    }

    #[test]
    fn test_whitespace_only_fields_are_ignored() {
        let criteria = SearchCriteria {
            subject: "   ".to_string(),
            full_text: "\t".to_string(),
            ..Default::default()
        };
        assert!(build_at(&criteria, &now()).predicate.is_match_all());
    }

    #[test]
    fn test_words_in_one_field_are_anded() {
        let criteria = SearchCriteria {
            subject: " quarterly   report ".to_string(),
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        assert_eq!(built.match_keys.subject, vec!["quarterly", "report"]);
        assert!(built.predicate.matches(&message("Quarterly sales report", "a@x.org")));
        assert!(!built.predicate.matches(&message("Quarterly sales", "a@x.org")));
    }

    #[test]
    fn test_fields_are_anded() {
        let criteria = SearchCriteria {
            subject: "foo".to_string(),
            sender: "bar".to_string(),
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        assert!(built.predicate.matches(&message("foo", "Bar Person <bp@x.org>")));
        assert!(!built.predicate.matches(&message("foo", "someone@x.org")));
        assert!(!built.predicate.matches(&message("nothing", "Bar Person <bp@x.org>")));
    }

    #[test]
    fn test_full_text_fans_out() {
        let criteria = SearchCriteria {
            full_text: "alpha beta".to_string(),
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        // both words in the subject
        assert!(built.predicate.matches(&message("alpha and beta", "x@y.org")));
        // words split across subject and sender do not count
        assert!(!built.predicate.matches(&message("alpha", "Beta <b@y.org>")));
        assert_eq!(built.match_keys.body, vec!["alpha", "beta"]);
        assert_eq!(built.match_keys.sender, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_full_text_keys_append_to_field_keys() {
        let criteria = SearchCriteria {
            subject: "foo".to_string(),
            full_text: "bar".to_string(),
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        assert_eq!(built.match_keys.subject, vec!["foo", "bar"]);
        assert_eq!(built.match_keys.recipient, vec!["bar"]);
    }

    #[test]
    fn test_attachment_variants() {
        let with_name = SearchCriteria {
            attachment: AttachmentFilter::With {
                name: Some(" invoice ".to_string()),
            },
            ..Default::default()
        };
        let mut msg = message("bill", "a@x.org");
        assert!(!build_at(&with_name, &now()).predicate.matches(&msg));
        msg.attachment_names.push("Invoice-2024.pdf".to_string());
        assert!(build_at(&with_name, &now()).predicate.matches(&msg));

        let without = SearchCriteria {
            attachment: AttachmentFilter::Without,
            ..Default::default()
        };
        assert!(!build_at(&without, &now()).predicate.matches(&msg));

        let any_with = SearchCriteria {
            attachment: AttachmentFilter::With { name: None },
            ..Default::default()
        };
        assert!(build_at(&any_with, &now()).predicate.matches(&msg));
    }

    #[test]
    fn test_last_days_starts_at_midnight() {
        let criteria = SearchCriteria {
            date_range: DateRange::LastDays(1),
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        let expected = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        assert_eq!(
            built.predicate,
            PredicateNode::And(vec![Leaf::DateAfter { at: expected }.into()])
        );

        let week = SearchCriteria {
            date_range: DateRange::LastDays(7),
            ..Default::default()
        };
        let built = build_at(&week, &now());
        let expected = Utc.with_ymd_and_hms(2024, 6, 9, 0, 0, 0).unwrap();
        assert_eq!(
            built.predicate,
            PredicateNode::And(vec![Leaf::DateAfter { at: expected }.into()])
        );
    }

    #[test]
    fn test_custom_range_snaps_to_day_bounds() {
        let criteria = SearchCriteria {
            date_range: DateRange::Custom {
                from: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
            },
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        let leaves = built.predicate.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(
            leaves[0],
            &Leaf::DateAfter {
                at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
            }
        );
        assert_eq!(
            leaves[1],
            &Leaf::DateBefore {
                at: Utc.with_ymd_and_hms(2024, 6, 14, 23, 59, 59).unwrap()
            }
        );
        assert!(built.predicate.matches(&message("x", "a@x.org")));
    }

    #[test]
    fn test_inverted_custom_range_clamps_end() {
        let criteria = SearchCriteria {
            date_range: DateRange::Custom {
                from: NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            },
            ..Default::default()
        };
        let built = build_at(&criteria, &now());
        assert!(built.predicate.matches(&message("x", "a@x.org")));
    }
}
