//! Predicate trees and the advanced-search predicate builder
//!
//! A predicate is a tagged tree of `(field, operator, value)` leaves joined by
//! AND/OR. It is evaluated as a pure function of one indexed message, and it is
//! serializable so saved searches can persist it.

mod builder;
mod node;

pub use builder::{
    AttachmentFilter, BuiltQuery, DateRange, MatchKeys, SearchCriteria, build, build_at,
    split_to_compact_words,
};
pub use node::{EqualsTerm, Field, Leaf, Operator, PredicateNode, TextField};
