//! Data model shared by the crawler, the reconciler and the store
//!
//! - `Record` / `RecordFields`: structured item data and its fingerprint
//! - `ChangelogEntry`: one detected NEW / UPDATED / DELETED change
//! - `SessionSummary`: statistics of one crawl session

mod changelog;
mod record;
mod session;

pub use changelog::{ChangeKind, ChangelogEntry, FieldChange};
pub use record::{Record, RecordFields, FIELD_SEPARATOR, TRACKED_FIELDS};
pub use session::{SessionStatus, SessionSummary};
