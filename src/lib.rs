//! pwdsvc: read-only queries over passwd and group files
//!
//! Loads an account file and a group file in the classic colon-delimited
//! layout, indexes every field, and answers exact-match lookups and compound
//! queries. Each record type lives in an immutable snapshot that is rebuilt
//! and swapped in whole when its file changes, so readers never see a
//! half-loaded view.
//!
//! # Architecture
//!
//! - **Record**: typed field layouts and line parsing
//! - **Field Index**: value to record lookup per field, member lists exploded
//! - **Dataset**: one immutable snapshot plus the query engine over it
//! - **Data Store**: atomically published snapshots and the reload protocol
//! - **Watcher**: reloads a type when its source file changes
//!
//! # Example Usage
//!
//! ```no_run
//! use pwdsvc::{Criteria, DataStore, RecordType};
//!
//! let store = DataStore::with_paths("/etc/passwd", "/etc/group");
//!
//! let criteria = Criteria::new()
//!     .with("gid", "999")
//!     .with("member", "alice")
//!     .with("member", "bob");
//! for group in store.query(RecordType::Group, &criteria).unwrap() {
//!     println!("{}", group);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod index;
pub mod output;
pub mod record;
pub mod server;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use config::{Config, FilesConfig};
pub use dataset::{Criteria, Dataset, LoadStats};
pub use error::{MalformedLine, StoreError};
pub use index::FieldIndex;
pub use record::{Record, RecordType, parse_line};
pub use store::{DataStore, TypeStatus};
pub use watcher::{FileWatcher, WatchConfig};
