//! Serde support for `exec_timeout`.
//!
//! Accepted forms: a number of seconds, a string (`"60"`, `"60s"`,
//! `"1m 30s"`) or `{"seconds": n, "nanos": m}`. Written back as a
//! humantime string.

use humantime_serde::re::humantime;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Seconds(u64),
    Fractional(f64),
    Text(String),
    Proto {
        #[serde(default)]
        seconds: u64,
        #[serde(default)]
        nanos: u32,
    },
}

pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    let raw = Option::<RawTimeout>::deserialize(deserializer)?;
    let duration = match raw {
        None => return Ok(None),
        Some(RawTimeout::Seconds(s)) => Duration::from_secs(s),
        Some(RawTimeout::Fractional(s)) => {
            Duration::try_from_secs_f64(s).map_err(|e| D::Error::custom(format!("exec_timeout: {e}")))?
        }
        Some(RawTimeout::Text(text)) => parse_text(&text).map_err(D::Error::custom)?,
        Some(RawTimeout::Proto { seconds, nanos }) => Duration::from_secs(seconds)
            .checked_add(Duration::from_nanos(nanos.into()))
            .ok_or_else(|| D::Error::custom("exec_timeout: duration overflow"))?,
    };
    Ok(Some(duration))
}

fn parse_text(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).map_err(|e| format!("exec_timeout {text:?}: {e}"))
}
