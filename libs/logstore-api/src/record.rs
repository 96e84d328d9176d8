use std::fmt;
use std::str::FromStr;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Record as it arrives on the wire (broker message or HTTP body).
///
/// Only a JSON object decodes into a record; positional arrays are rejected.
/// Every field defaults to its zero value so that a missing field is reported
/// by validation, naming the field, rather than as a malformed payload.
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub unix_time: u32,
    pub level: String,
    pub pathname: String,
    pub message: String,
}

#[derive(Deserialize)]
#[serde(field_identifier, rename_all = "snake_case")]
enum RecordKey {
    UnixTime,
    Level,
    Pathname,
    Message,
    #[serde(other)]
    Unknown,
}

struct RawRecordVisitor;

impl<'de> Visitor<'de> for RawRecordVisitor {
    type Value = RawRecord;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a log record object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawRecord, A::Error> {
        let mut unix_time = None;
        let mut level = None;
        let mut pathname = None;
        let mut message = None;

        while let Some(key) = map.next_key::<RecordKey>()? {
            match key {
                RecordKey::UnixTime if unix_time.is_some() => {
                    return Err(de::Error::duplicate_field("unix_time"));
                }
                RecordKey::UnixTime => unix_time = Some(map.next_value()?),
                RecordKey::Level if level.is_some() => {
                    return Err(de::Error::duplicate_field("level"));
                }
                RecordKey::Level => level = Some(map.next_value()?),
                RecordKey::Pathname if pathname.is_some() => {
                    return Err(de::Error::duplicate_field("pathname"));
                }
                RecordKey::Pathname => pathname = Some(map.next_value()?),
                RecordKey::Message if message.is_some() => {
                    return Err(de::Error::duplicate_field("message"));
                }
                RecordKey::Message => message = Some(map.next_value()?),
                RecordKey::Unknown => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(RawRecord {
            unix_time: unix_time.unwrap_or_default(),
            level: level.unwrap_or_default(),
            pathname: pathname.unwrap_or_default(),
            message: message.unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawRecordVisitor)
    }
}

/// Decode one inbound message body: a JSON array of records.
pub fn decode_records(body: &[u8]) -> Result<Vec<RawRecord>, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Severity level. Parsing is case-insensitive, display is canonical upper case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: '{0}'")]
pub struct UnknownLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// Validated log record. Only [`crate::validate`] builds one from wire input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainLog {
    /// Unix seconds, never zero.
    pub timestamp: u32,
    pub level: LogLevel,
    pub path: String,
    pub message: String,
}

/// Records decoded from one inbound message. Unit of hand-off and of persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    records: Vec<DomainLog>,
}

impl LogBatch {
    pub fn new(records: Vec<DomainLog>) -> Self {
        Self { records }
    }

    /// Validate every raw record; the first failure rejects the whole batch.
    pub fn from_raw(raw: Vec<RawRecord>) -> Result<Self, crate::ValidationError> {
        let records = raw
            .into_iter()
            .map(crate::validate)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }

    pub fn records(&self) -> &[DomainLog] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<DomainLog> {
        self.records
    }
}
