//! The data store: one published snapshot per record type
//!
//! Readers load the current [`Dataset`] for a type with a single atomic
//! pointer read and run their whole lookup or query against it. A reload
//! builds a replacement snapshot off to the side and publishes it with one
//! [`ArcSwap::store`]; snapshots still held by in-flight readers stay alive
//! until the last reader drops them.
//!
//! Reloads of the same type are serialized by a per-type mutex so two
//! concurrent reloads cannot publish out of order. Reloads of different
//! types are independent.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::FilesConfig;
use crate::dataset::{Criteria, Dataset};
use crate::error::{Result, StoreError};
use crate::record::{MEMBERS_FIELD, Record, RecordType};

/// Per-type state owned by the store
struct Slot {
    path: PathBuf,
    current: ArcSwap<Dataset>,
    reload_lock: Mutex<()>,
}

impl Slot {
    fn open(record_type: RecordType, path: PathBuf) -> Self {
        let dataset = Dataset::load(record_type, &path);
        Self {
            path,
            current: ArcSwap::from_pointee(dataset),
            reload_lock: Mutex::new(()),
        }
    }
}

/// Load summary of one record type, as reported by health checks
#[derive(Debug, Clone, Serialize)]
pub struct TypeStatus {
    pub record_type: RecordType,
    pub path: PathBuf,
    pub available: bool,
    pub records: usize,
    pub skipped_lines: usize,
    pub loaded_at: DateTime<Utc>,
    /// Distinct values indexed per field
    pub distinct_values: BTreeMap<&'static str, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TypeStatus {
    fn of(dataset: &Dataset) -> Self {
        let stats = dataset.stats();
        Self {
            record_type: dataset.record_type(),
            path: dataset.path().to_path_buf(),
            available: dataset.is_available(),
            records: stats.records,
            skipped_lines: stats.skipped_lines,
            loaded_at: stats.loaded_at,
            distinct_values: dataset.distinct_values(),
            error: dataset.error().map(ToString::to_string),
        }
    }
}

/// Read-only view over the account and group source files
pub struct DataStore {
    accounts: Slot,
    groups: Slot,
}

impl DataStore {
    /// Load both record types from the configured paths.
    ///
    /// A type whose file cannot be read still gets a snapshot; queries
    /// against it fail with `SourceUnavailable` until a later reload
    /// succeeds.
    pub fn open(files: &FilesConfig) -> Self {
        Self::with_paths(&files.passwd, &files.group)
    }

    pub fn with_paths(passwd: impl AsRef<Path>, group: impl AsRef<Path>) -> Self {
        log::debug!("Opening data store");
        let store = Self {
            accounts: Slot::open(RecordType::Account, passwd.as_ref().to_path_buf()),
            groups: Slot::open(RecordType::Group, group.as_ref().to_path_buf()),
        };
        log::debug!("Data store ready");
        store
    }

    fn slot(&self, record_type: RecordType) -> &Slot {
        match record_type {
            RecordType::Account => &self.accounts,
            RecordType::Group => &self.groups,
        }
    }

    /// Configured source path of a record type
    pub fn path(&self, record_type: RecordType) -> &Path {
        &self.slot(record_type).path
    }

    /// Currently published snapshot of a record type
    pub fn snapshot(&self, record_type: RecordType) -> Arc<Dataset> {
        self.slot(record_type).current.load_full()
    }

    /// All records of a type, or those whose `field` equals `value`
    pub fn lookup(
        &self,
        record_type: RecordType,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<Arc<Record>>> {
        let snapshot = self.slot(record_type).current.load();
        match filter {
            None => snapshot.all(),
            Some((field, value)) => snapshot.lookup(field, value),
        }
    }

    /// Records of a type matching every criterion; see [`Dataset::query`]
    pub fn query(&self, record_type: RecordType, criteria: &Criteria) -> Result<Vec<Arc<Record>>> {
        self.slot(record_type).current.load().query(criteria)
    }

    /// [`DataStore::lookup`] keyed by type name
    pub fn lookup_by_name(
        &self,
        type_name: &str,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<Arc<Record>>> {
        self.lookup(parse_type_name(type_name)?, filter)
    }

    /// [`DataStore::query`] keyed by type name
    pub fn query_by_name(&self, type_name: &str, criteria: &Criteria) -> Result<Vec<Arc<Record>>> {
        self.query(parse_type_name(type_name)?, criteria)
    }

    /// Re-read the source file of a type and publish the new snapshot.
    ///
    /// Always publishes, even when the file is unreadable: the previous good
    /// snapshot is not retained once a reload has been attempted.
    pub fn reload(&self, record_type: RecordType) {
        let slot = self.slot(record_type);
        let _guard = slot
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        log::info!("Reloading {} records from {}", record_type, slot.path.display());
        let dataset = Dataset::load(record_type, &slot.path);
        slot.current.store(Arc::new(dataset));
    }

    /// [`DataStore::reload`] keyed by type name
    pub fn reload_by_name(&self, type_name: &str) -> Result<()> {
        self.reload(parse_type_name(type_name)?);
        Ok(())
    }

    pub fn reload_all(&self) {
        self.reload(RecordType::Account);
        self.reload(RecordType::Group);
    }

    /// Load status of both record types
    pub fn status(&self) -> Vec<TypeStatus> {
        [RecordType::Account, RecordType::Group]
            .into_iter()
            .map(|t| TypeStatus::of(&self.snapshot(t)))
            .collect()
    }

    /// Groups of the account with `uid`.
    ///
    /// The account's primary group comes first, followed by every group that
    /// lists the account's name as a member, without duplicates. Returns
    /// `None` when no account has that uid.
    pub fn groups_for_user(&self, uid: &str) -> Result<Option<Vec<Arc<Record>>>> {
        let accounts = self.lookup(RecordType::Account, Some(("uid", uid)))?;
        let Some(account) = accounts.first() else {
            return Ok(None);
        };
        let name = account.name();
        let gid = account.get_field("gid").unwrap_or_default();

        let groups = self.slot(RecordType::Group).current.load();
        let mut result = groups.lookup("gid", gid)?;
        for group in groups.lookup(MEMBERS_FIELD, name)? {
            if !result.iter().any(|r| Arc::ptr_eq(r, &group)) {
                result.push(group);
            }
        }
        Ok(Some(result))
    }
}

fn parse_type_name(type_name: &str) -> Result<RecordType> {
    RecordType::from_str(type_name)
        .map_err(|_| StoreError::UnknownRecordType(type_name.to_string()))
}
