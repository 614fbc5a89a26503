//! Parser for action `exec_args`.
//!
//! Each argument is `key:value` (or `key=value`); an argument without a
//! splitter is a key with an empty value. When a key repeats, the later
//! argument wins.

use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_SPLITTER: char = ':';
const ALT_SPLITTER: char = '=';
const MULTI_VALUE_SPLITTER: char = ',';

/// Typed view over parsed action arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionArgs {
    values: HashMap<String, String>,
}

impl ActionArgs {
    /// Parse with the default `:` splitter.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
        Self::parse_with_splitter(args, DEFAULT_SPLITTER)
    }

    /// Parse splitting each argument at the first `splitter` or `=`,
    /// whichever comes first.
    pub fn parse_with_splitter<S: AsRef<str>>(args: &[S], splitter: char) -> Self {
        let mut values = HashMap::new();
        for arg in args {
            let arg = arg.as_ref().trim();
            if arg.is_empty() {
                continue;
            }
            let (key, value) = split_pair(arg, splitter);
            values.insert(key.to_string(), value.to_string());
        }
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Raw value, if the key is present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn as_bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.non_empty(key) else {
            debug!("Action args: {key:?} not set, using default {default}");
            return default;
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => {
                debug!("Action args: {key:?} value {raw:?} is not a bool, using default {default}");
                default
            }
        }
    }

    pub fn as_string(&self, key: &str, default: &str) -> String {
        match self.non_empty(key) {
            Some(raw) => raw.to_string(),
            None => {
                debug!("Action args: {key:?} not set, using default {default:?}");
                default.to_string()
            }
        }
    }

    /// Comma separated values; surrounding whitespace is trimmed and empty
    /// items are dropped.
    pub fn as_string_slice(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.non_empty(key) {
            Some(raw) => raw
                .split(MULTI_VALUE_SPLITTER)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => {
                debug!("Action args: {key:?} not set, using default {default:?}");
                default.iter().map(|s| s.to_string()).collect()
            }
        }
    }

    pub fn as_int(&self, key: &str, default: i64) -> i64 {
        self.parse_or(key, default)
    }

    pub fn as_float64(&self, key: &str, default: f64) -> f64 {
        self.parse_or(key, default)
    }

    /// Integer value of `key` (or `default_n`) multiplied by `unit`.
    pub fn as_duration(&self, key: &str, default_n: u64, unit: Duration) -> Duration {
        let n = self.parse_or(key, default_n);
        unit.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX))
    }

    /// Comma joined `k:v` (or `k=v`) pairs as a map.
    pub fn as_string_map(&self, key: &str) -> HashMap<String, String> {
        let Some(raw) = self.non_empty(key) else {
            debug!("Action args: {key:?} not set, using empty map");
            return HashMap::new();
        };
        raw.split(MULTI_VALUE_SPLITTER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| {
                let (k, v) = split_pair(item, DEFAULT_SPLITTER);
                (k.to_string(), v.to_string())
            })
            .collect()
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + std::fmt::Debug,
    {
        let Some(raw) = self.non_empty(key) else {
            debug!("Action args: {key:?} not set, using default {default:?}");
            return default;
        };
        match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                debug!("Action args: {key:?} value {raw:?} is malformed, using default {default:?}");
                default
            }
        }
    }
}

fn split_pair(arg: &str, splitter: char) -> (&str, &str) {
    let at = match (arg.find(splitter), arg.find(ALT_SPLITTER)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    match at {
        Some(i) => {
            let (key, rest) = arg.split_at(i);
            let sep_len = rest.chars().next().map_or(1, char::len_utf8);
            (key.trim(), rest[sep_len..].trim())
        }
        None => (arg, ""),
    }
}
