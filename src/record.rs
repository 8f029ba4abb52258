//! Record types, field layouts and line parsing
//!
//! Both source files use the classic colon-delimited layout. Each record type
//! carries a static [`Descriptor`] that says which raw tokens are kept and in
//! which order they are exposed.

use serde::ser::{Serialize, SerializeMap, Serializer};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::MalformedLine;

/// Field holding the comma-joined member list of a group
pub const MEMBERS_FIELD: &str = "members";

/// Reserved query key matched against [`MEMBERS_FIELD`] with subset semantics
pub const MEMBER_KEY: &str = "member";

/// Kind of record served by the store
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
    serde::Serialize, serde::Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// One line of a passwd file
    #[strum(to_string = "account", serialize = "passwd", serialize = "user", serialize = "users")]
    Account,
    /// One line of a group file
    #[strum(to_string = "group", serialize = "groups")]
    Group,
}

/// Static layout of one record type
#[derive(Debug)]
pub struct Descriptor {
    /// Exposed field names, in output order
    pub fields: &'static [&'static str],
    /// Number of `:`-separated tokens a well-formed line has
    pub raw_width: usize,
    /// Raw token position for each exposed field
    pub positions: &'static [usize],
}

static ACCOUNT: Descriptor = Descriptor {
    fields: &["name", "uid", "gid", "comment", "home", "shell"],
    raw_width: 7,
    positions: &[0, 2, 3, 4, 5, 6],
};

static GROUP: Descriptor = Descriptor {
    fields: &["name", "gid", MEMBERS_FIELD],
    raw_width: 4,
    positions: &[0, 2, 3],
};

impl Descriptor {
    /// Resolve a field name to its slot in the record
    pub fn field_slot(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| *f == name)
    }

    /// Slot of the member list, if this type has one
    pub fn members_slot(&self) -> Option<usize> {
        self.field_slot(MEMBERS_FIELD)
    }
}

impl RecordType {
    pub fn descriptor(self) -> &'static Descriptor {
        match self {
            RecordType::Account => &ACCOUNT,
            RecordType::Group => &GROUP,
        }
    }

    /// Whether the reserved `member` query key applies to this type
    pub fn has_members(self) -> bool {
        self.descriptor().members_slot().is_some()
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// One parsed line of a source file
///
/// Values are stored in descriptor order and never change after parsing; a
/// reload produces new records rather than editing these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    record_type: RecordType,
    values: Box<[String]>,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Value of the named field, `None` if the type does not define it
    pub fn get_field(&self, name: &str) -> Option<&str> {
        let slot = self.record_type.descriptor().field_slot(name)?;
        Some(self.values[slot].as_str())
    }

    /// Value stored in a descriptor slot
    pub fn slot(&self, slot: usize) -> &str {
        &self.values[slot]
    }

    pub fn name(&self) -> &str {
        &self.values[0]
    }

    /// Field name/value pairs in descriptor order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.record_type
            .descriptor()
            .fields
            .iter()
            .copied()
            .zip(self.values.iter().map(String::as_str))
    }

    /// Individual member names of a group; empty for other types
    pub fn members(&self) -> impl Iterator<Item = &str> + '_ {
        self.record_type
            .descriptor()
            .members_slot()
            .map(|slot| self.values[slot].split(','))
            .into_iter()
            .flatten()
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members().any(|m| m == name)
    }

    /// Field-ordered JSON text of this record
    pub fn to_json(&self) -> String {
        // Serializing a map of string pairs cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_json())
    }
}

/// Parse one line of a source file into a record.
///
/// One trailing `\n` is stripped before splitting on `:`; any other byte,
/// a `\r` included, stays in its token. A line whose token count differs
/// from the type's raw width is rejected.
pub fn parse_line(record_type: RecordType, line: &str) -> Result<Record, MalformedLine> {
    let descriptor = record_type.descriptor();
    let trimmed = line.strip_suffix('\n').unwrap_or(line);

    let tokens: Vec<&str> = trimmed.split(':').collect();
    if tokens.len() != descriptor.raw_width {
        return Err(MalformedLine {
            record_type,
            expected: descriptor.raw_width,
            found: tokens.len(),
            line: trimmed.to_string(),
        });
    }

    let values: Box<[String]> = descriptor
        .positions
        .iter()
        .map(|&pos| tokens[pos].to_string())
        .collect();

    Ok(Record {
        record_type,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_parse_account_line() {
        let record = parse_line(
            RecordType::Account,
            "root:x:0:0:root:/root:/bin/bash\n",
        )
        .unwrap();

        assert_eq!(record.get_field("name"), Some("root"));
        assert_eq!(record.get_field("uid"), Some("0"));
        assert_eq!(record.get_field("gid"), Some("0"));
        assert_eq!(record.get_field("comment"), Some("root"));
        assert_eq!(record.get_field("home"), Some("/root"));
        assert_eq!(record.get_field("shell"), Some("/bin/bash"));
    }

    #[test]
    fn test_account_drops_password_token() {
        let line = "dwoodlins:secret:1001:1001::/home/dwoodlins:/bin/false";
        let record = parse_line(RecordType::Account, line).unwrap();
        assert!(record.fields().all(|(_, v)| v != "secret"));
        assert_eq!(record.get_field("comment"), Some(""));
    }

    #[test]
    fn test_parse_group_line_keeps_members_joined() {
        let record = parse_line(RecordType::Group, "test_users:x:999:AAAA,BBBB,CCCC\n").unwrap();

        assert_eq!(record.name(), "test_users");
        assert_eq!(record.get_field("gid"), Some("999"));
        assert_eq!(record.get_field("members"), Some("AAAA,BBBB,CCCC"));
        assert_eq!(record.members().collect::<Vec<_>>(), vec!["AAAA", "BBBB", "CCCC"]);
        assert!(record.has_member("BBBB"));
        assert!(!record.has_member("BBB"));
    }

    #[test]
    fn test_wrong_token_count_is_rejected() {
        let err = parse_line(RecordType::Account, "root:x:0:0:root:/root").unwrap_err();
        assert_eq!(err.expected, 7);
        assert_eq!(err.found, 6);

        let err = parse_line(RecordType::Group, "wheel:x:10:a:b").unwrap_err();
        assert_eq!(err.expected, 4);
        assert_eq!(err.found, 5);
    }

    #[test]
    fn test_carriage_return_is_kept() {
        let record = parse_line(RecordType::Group, "staff:x:20:alice\r\n").unwrap();
        assert_eq!(record.get_field("members"), Some("alice\r"));
        assert!(record.has_member("alice\r"));
        assert!(!record.has_member("alice"));

        let record = parse_line(RecordType::Account, "bob:x:1:1::/home/bob:/bin/sh\r").unwrap();
        assert_eq!(record.get_field("shell"), Some("/bin/sh\r"));
    }

    #[test]
    fn test_unknown_field_is_absent() {
        let record = parse_line(RecordType::Group, "staff:x:20:").unwrap();
        assert_eq!(record.get_field("shell"), None);
        assert_eq!(record.get_field("member"), None);
    }

    #[test]
    fn test_json_is_field_ordered() {
        let record = parse_line(RecordType::Group, "docker:x:998:alice,bob").unwrap();
        assert_eq!(
            record.to_json(),
            r#"{"name":"docker","gid":"998","members":"alice,bob"}"#
        );
        assert_eq!(record.to_string(), record.to_json());

        let line = "bob:x:1000:1000:Bob:/home/bob:/bin/zsh";
        let account = parse_line(RecordType::Account, line).unwrap();
        assert_eq!(
            account.to_json(),
            concat!(
                r#"{"name":"bob","uid":"1000","gid":"1000","#,
                r#""comment":"Bob","home":"/home/bob","shell":"/bin/zsh"}"#
            )
        );
    }

    #[test]
    fn test_record_type_parsing() {
        assert_eq!(RecordType::from_str("account").unwrap(), RecordType::Account);
        assert_eq!(RecordType::from_str("passwd").unwrap(), RecordType::Account);
        assert_eq!(RecordType::from_str("Users").unwrap(), RecordType::Account);
        assert_eq!(RecordType::from_str("GROUP").unwrap(), RecordType::Group);
        assert!(RecordType::from_str("shadow").is_err());

        assert_eq!(RecordType::Account.to_string(), "account");
        assert_eq!(RecordType::Group.as_str(), "group");
    }

    #[test]
    fn test_descriptors_are_consistent() {
        for record_type in RecordType::iter() {
            let d = record_type.descriptor();
            assert_eq!(d.fields.len(), d.positions.len());
            assert!(d.positions.iter().all(|&p| p < d.raw_width));
        }
        assert!(RecordType::Group.has_members());
        assert!(!RecordType::Account.has_members());
    }
}
