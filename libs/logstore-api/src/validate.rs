use std::fmt;

use crate::record::{DomainLog, LogLevel, RawRecord};

/// Required record field, in the order validation checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Timestamp,
    Level,
    Path,
    Message,
}

impl Field {
    /// Wire name of the field.
    pub fn name(&self) -> &'static str {
        match self {
            Field::Timestamp => "timestamp",
            Field::Level => "level",
            Field::Path => "pathname",
            Field::Message => "message",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} is required")]
pub struct ValidationError {
    pub field: Field,
}

impl ValidationError {
    pub fn new(field: Field) -> Self {
        Self { field }
    }
}

/// Turn a wire record into a [`DomainLog`].
///
/// Fields are checked in a fixed order (timestamp, level, pathname, message)
/// and the first failure is returned. A level outside the known set fails on
/// `level` just like an empty one.
pub fn validate(raw: RawRecord) -> Result<DomainLog, ValidationError> {
    if raw.unix_time == 0 {
        return Err(ValidationError::new(Field::Timestamp));
    }
    let level: LogLevel = raw
        .level
        .parse()
        .map_err(|_| ValidationError::new(Field::Level))?;
    if raw.pathname.is_empty() {
        return Err(ValidationError::new(Field::Path));
    }
    if raw.message.is_empty() {
        return Err(ValidationError::new(Field::Message));
    }
    Ok(DomainLog {
        timestamp: raw.unix_time,
        level,
        path: raw.pathname,
        message: raw.message,
    })
}
