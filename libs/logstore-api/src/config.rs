use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Deserialize a human-readable duration (`"5s"`, `"500ms"`, `"1m"`).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}
