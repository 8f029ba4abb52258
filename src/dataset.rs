//! Immutable dataset snapshots and the query engine that runs against them
//!
//! A [`Dataset`] is everything the store knows about one record type at one
//! point in time: the records in file order, their [`FieldIndex`], and the
//! error of the load that produced it (if any). Snapshots are built off to the
//! side and published whole, so every lookup and compound query here sees a
//! single consistent view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Result, StoreError};
use crate::index::FieldIndex;
use crate::record::{MEMBER_KEY, Record, RecordType, parse_line};

/// Counters describing the load that produced a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct LoadStats {
    /// Records successfully parsed
    pub records: usize,
    /// Lines dropped because their token count was wrong
    pub skipped_lines: usize,
    /// When the load finished
    pub loaded_at: DateTime<Utc>,
}

/// Ordered, multi-valued query criteria
///
/// Keys are field names of the record type, or the reserved key `member`
/// which may repeat and matches groups whose member list contains every
/// given name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Criteria {
    pairs: Vec<(String, String)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Criteria::push`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Where a candidate seed comes from
enum Seed<'a> {
    /// Entry of `Compiled::fields`, read once all criteria are compiled
    Field(usize),
    /// A member name looked up in the members slot
    Member(usize, &'a str),
}

/// Criteria resolved against a descriptor
struct Compiled<'a> {
    /// (slot, value) pairs that must match exactly, one per distinct key
    fields: Vec<(usize, &'a str)>,
    /// Member names that must all appear in the member list
    members: Vec<&'a str>,
    /// Seeds in order of first appearance of their key
    seeds: Vec<Seed<'a>>,
}

impl<'a> Compiled<'a> {
    fn seeds(&self) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        self.seeds.iter().map(|seed| match *seed {
            Seed::Field(i) => self.fields[i],
            Seed::Member(slot, value) => (slot, value),
        })
    }
}

/// One published view of a record type
#[derive(Debug)]
pub struct Dataset {
    record_type: RecordType,
    path: PathBuf,
    records: Vec<Arc<Record>>,
    index: FieldIndex,
    error: Option<StoreError>,
    stats: LoadStats,
}

impl Dataset {
    /// Read and index the source file at `path`.
    ///
    /// Never fails: an unreadable file yields an empty snapshot carrying a
    /// `SourceUnavailable` error, and malformed lines are logged and skipped.
    pub fn load(record_type: RecordType, path: &Path) -> Self {
        let start = Instant::now();
        log::debug!("Loading {} records from {}", record_type, path.display());

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = StoreError::source_unavailable(record_type, path, e);
                log::error!("{}", err);
                return Self::unavailable(record_type, path, err);
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let mut records = Vec::new();
        let mut skipped_lines = 0;

        // Only the newline is a terminator; a trailing `\r` stays in the last token
        for line in content.split_terminator('\n') {
            match parse_line(record_type, line) {
                Ok(record) => records.push(Arc::new(record)),
                Err(e) => {
                    log::warn!("Skipping line in {}: {}", path.display(), e);
                    skipped_lines += 1;
                }
            }
        }

        let dataset = Self::from_records(record_type, path, records, skipped_lines);
        log::info!(
            "Loaded {} {} records from {} in {:?} ({} skipped)",
            dataset.stats.records,
            record_type,
            path.display(),
            start.elapsed(),
            skipped_lines
        );
        dataset
    }

    /// Build a snapshot from records that were already parsed
    pub fn from_records(
        record_type: RecordType,
        path: &Path,
        records: Vec<Arc<Record>>,
        skipped_lines: usize,
    ) -> Self {
        let index = FieldIndex::build(record_type, &records);
        Self {
            record_type,
            path: path.to_path_buf(),
            stats: LoadStats {
                records: records.len(),
                skipped_lines,
                loaded_at: Utc::now(),
            },
            records,
            index,
            error: None,
        }
    }

    fn unavailable(record_type: RecordType, path: &Path, error: StoreError) -> Self {
        Self {
            record_type,
            path: path.to_path_buf(),
            records: Vec::new(),
            index: FieldIndex::default(),
            error: Some(error),
            stats: LoadStats {
                records: 0,
                skipped_lines: 0,
                loaded_at: Utc::now(),
            },
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// Number of distinct indexed values per field.
    ///
    /// Group member lists count each member name separately.
    pub fn distinct_values(&self) -> BTreeMap<&'static str, usize> {
        self.record_type
            .descriptor()
            .fields
            .iter()
            .enumerate()
            .map(|(slot, &field)| (field, self.index.distinct_values(slot)))
            .collect()
    }

    /// Error of the load that produced this snapshot
    pub fn error(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }

    fn check_available(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn slot_for(&self, field: &str) -> Result<usize> {
        self.record_type
            .descriptor()
            .field_slot(field)
            .ok_or_else(|| StoreError::unknown_field(self.record_type, field))
    }

    /// All records in load order
    pub fn all(&self) -> Result<Vec<Arc<Record>>> {
        self.check_available()?;
        Ok(self.records.clone())
    }

    /// Records whose `field` equals `value`.
    ///
    /// For the `members` field of groups, `value` is a single member name.
    /// An unmatched value yields an empty list.
    pub fn lookup(&self, field: &str, value: &str) -> Result<Vec<Arc<Record>>> {
        self.check_available()?;
        let slot = self.slot_for(field)?;
        let found = self.positions(slot, value);
        log::debug!(
            "Lookup {}.{}={:?}: {} record(s)",
            self.record_type,
            field,
            value,
            found.len()
        );
        Ok(found.iter().map(|&pos| self.records[pos].clone()).collect())
    }

    fn positions(&self, slot: usize, value: &str) -> &[usize] {
        self.index.get(slot, value)
    }

    /// Records matching every criterion.
    ///
    /// Candidates are seeded from the index of each criteria pair, deduplicated
    /// in first-seen order, then verified against the full criteria. Repeated
    /// `member` keys require every named member to be present; extra members
    /// in the group are allowed. For a repeated plain key the last value wins.
    /// Empty criteria match nothing.
    pub fn query(&self, criteria: &Criteria) -> Result<Vec<Arc<Record>>> {
        self.check_available()?;
        if criteria.is_empty() {
            log::debug!("Query {} with no criteria", self.record_type);
            return Ok(Vec::new());
        }
        let compiled = self.compile(criteria)?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for (slot, value) in compiled.seeds() {
            for &pos in self.positions(slot, value) {
                if !seen.insert(pos) {
                    continue;
                }
                let record = &self.records[pos];
                if Self::matches(record, &compiled) {
                    results.push(record.clone());
                } else {
                    log::trace!("Rejected candidate {} for {:?}", record.name(), criteria);
                }
            }
        }

        log::debug!(
            "Query {} {:?}: {} candidate(s), {} match(es)",
            self.record_type,
            criteria,
            seen.len(),
            results.len()
        );
        Ok(results)
    }

    fn compile<'a>(&self, criteria: &'a Criteria) -> Result<Compiled<'a>> {
        let descriptor = self.record_type.descriptor();
        let mut compiled = Compiled {
            fields: Vec::new(),
            members: Vec::new(),
            seeds: Vec::with_capacity(criteria.len()),
        };

        for (key, value) in criteria.iter() {
            if key == MEMBER_KEY {
                let slot = descriptor
                    .members_slot()
                    .ok_or_else(|| StoreError::unknown_field(self.record_type, key))?;
                compiled.members.push(value);
                compiled.seeds.push(Seed::Member(slot, value));
            } else {
                let slot = self.slot_for(key)?;
                match compiled.fields.iter_mut().find(|(s, _)| *s == slot) {
                    Some(existing) => existing.1 = value,
                    None => {
                        compiled.fields.push((slot, value));
                        compiled.seeds.push(Seed::Field(compiled.fields.len() - 1));
                    }
                }
            }
        }

        Ok(compiled)
    }

    fn matches(record: &Record, compiled: &Compiled<'_>) -> bool {
        compiled
            .fields
            .iter()
            .all(|&(slot, value)| record.slot(slot) == value)
            && compiled.members.iter().all(|m| record.has_member(m))
    }
}
