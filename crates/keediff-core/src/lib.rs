//! Entry reconciliation engine for keediff.
//!
//! Compares two KeePass databases entry by entry, finds duplicate logins,
//! moves entries between databases and searches across both. Everything
//! operates on the in-memory [`models::Database`]; [`database`] converts to
//! and from KDBX files.

pub mod accessor;
pub mod csv_import;
pub mod database;
pub mod diff;
pub mod duplicates;
pub mod error;
pub mod export;
pub mod matcher;
pub mod merge;
pub mod models;
pub mod search;

pub use database::KeepassDatabase;
pub use diff::{compare, DiffReport};
pub use duplicates::{find_duplicates, DuplicateCriteria, DuplicateReport};
pub use error::{ReconcileError, ReconcileResult};
pub use merge::{import_entries, transfer, ImportMode, TransferRequest};
pub use models::{parse_uuid, Database, Entry, EntryRef, FieldName, Group};
pub use search::{find_counterpart, search};
