// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record to wire payload conversion.
//!
//! The dispatcher only knows the [`Serializer`] trait. [`JsonEventLayout`] is
//! the layout shipped with the crate: one JSON document per record, in the
//! Logstash v1 event shape (`@version`, `@timestamp`, then ECS-style dotted
//! fields such as `log.level` and `host.name`).
//!
//! # Output Format
//!
//! ```json
//! {
//!   "@version": 1,
//!   "@timestamp": "2024-01-02T03:04:05.678Z",
//!   "log": {"logger": "app.db", "level": "WARN"},
//!   "message": "slow query",
//!   "host": {"name": "web-1", "architecture": "x86_64", "os": {"name": "linux"}},
//!   "process": {"pid": 4242, "thread": {"name": "worker-3"}}
//! }
//! ```

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::host::HostData;
use crate::record::Record;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const EVENT_VERSION: u64 = 1;

/// Turns one record into one wire payload.
///
/// Implementations must be cheap to call from the dispatcher thread and must
/// not panic. A returned error only skips that record; the rest of the batch
/// still ships.
pub trait Serializer: Send + Sync {
    fn format(&self, record: &Record) -> Result<String, SerializeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("failed to encode event as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record rejected by serializer: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("invalid user field pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum UserFieldValue {
    /// Emits the logger name when it matches the whole pattern.
    LoggerMatch(Regex),
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone)]
struct UserField {
    key: String,
    value: UserFieldValue,
}

/// Parses `key:value,key2:(pattern)` user field definitions.
fn parse_user_fields(definitions: &str) -> Result<Vec<UserField>, LayoutError> {
    let mut fields = Vec::new();
    for pair in definitions.split(',') {
        if pair.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once(':') else {
            warn!("Ignoring user field '{pair}': expected key:value");
            continue;
        };

        let value = if value.len() >= 2 && value.starts_with('(') && value.ends_with(')') {
            let anchored = format!("^(?:{value})$");
            let regex = Regex::new(&anchored).map_err(|source| LayoutError::InvalidPattern {
                pattern: value.to_string(),
                source,
            })?;
            UserFieldValue::LoggerMatch(regex)
        } else if let Ok(number) = value.parse::<i64>() {
            UserFieldValue::Integer(number)
        } else {
            UserFieldValue::Text(value.to_string())
        };

        fields.push(UserField {
            key: key.to_string(),
            value,
        });
    }
    Ok(fields)
}

/// Inserts `value` at a dotted path, creating intermediate objects.
///
/// An intermediate that holds a non-object value is replaced by an object.
pub(crate) fn insert_dotted(target: &mut Map<String, Value>, key: &str, value: Value) {
    let mut object = target;
    let mut segments = key.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return;
        }
        let entry = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        object = next;
    }
}

#[derive(Debug, Clone)]
pub struct JsonEventLayout {
    location_info: bool,
    user_fields: Vec<UserField>,
    host: HostData,
}

impl Default for JsonEventLayout {
    fn default() -> Self {
        Self::new(true)
    }
}

impl JsonEventLayout {
    #[must_use]
    pub fn new(location_info: bool) -> Self {
        Self {
            location_info,
            user_fields: Vec::new(),
            host: HostData::collect(),
        }
    }

    /// Adds user fields, e.g. `team:core,shard:3,component:((app|lib)\.db\..*)`.
    pub fn with_user_fields(mut self, definitions: &str) -> Result<Self, LayoutError> {
        self.user_fields.extend(parse_user_fields(definitions)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_host(mut self, host: HostData) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn location_info(&self) -> bool {
        self.location_info
    }

    fn to_event(&self, record: &Record) -> Map<String, Value> {
        let mut event = Map::new();
        // Core fields below overwrite colliding extra fields.
        for (key, value) in &record.fields {
            if !value.is_null() {
                insert_dotted(&mut event, key, value.clone());
            }
        }

        event.insert("@version".to_string(), Value::from(EVENT_VERSION));
        event.insert(
            "@timestamp".to_string(),
            Value::from(record.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        insert_dotted(&mut event, "log.logger", Value::from(record.logger.as_str()));

        for field in &self.user_fields {
            let value = match &field.value {
                UserFieldValue::LoggerMatch(regex) => {
                    if !regex.is_match(&record.logger) {
                        continue;
                    }
                    Value::from(record.logger.as_str())
                }
                UserFieldValue::Integer(number) => Value::from(*number),
                UserFieldValue::Text(text) => Value::from(text.as_str()),
            };
            insert_dotted(&mut event, &field.key, value);
        }

        insert_dotted(&mut event, "message", Value::from(record.message.as_str()));
        insert_dotted(&mut event, "host.name", Value::from(self.host.hostname.as_str()));
        insert_dotted(
            &mut event,
            "host.architecture",
            Value::from(self.host.architecture.as_str()),
        );
        insert_dotted(&mut event, "host.os.name", Value::from(self.host.os_name.as_str()));
        if let Some(version) = &self.host.os_version {
            insert_dotted(&mut event, "host.os.version", Value::from(version.as_str()));
        }
        insert_dotted(&mut event, "process.pid", Value::from(self.host.pid));

        if let Some(error) = &record.error {
            if let Some(kind) = &error.kind {
                insert_dotted(&mut event, "error.type", Value::from(kind.as_str()));
            }
            if let Some(message) = &error.message {
                insert_dotted(&mut event, "error.message", Value::from(message.as_str()));
            }
            if !error.stack_trace.is_empty() {
                insert_dotted(
                    &mut event,
                    "error.stack_trace",
                    Value::from(error.stack_trace.join("\n")),
                );
            }
        }

        if self.location_info {
            if let Some(location) = &record.location {
                if let Some(file) = &location.file {
                    insert_dotted(&mut event, "log.origin.file.name", Value::from(file.as_str()));
                }
                if let Some(line) = location.line {
                    insert_dotted(&mut event, "log.origin.file.line", Value::from(line));
                }
                if let Some(function) = &location.function {
                    insert_dotted(&mut event, "log.origin.function", Value::from(function.as_str()));
                }
            }
        }

        insert_dotted(&mut event, "log.level", Value::from(record.level.to_string()));
        if let Some(thread_name) = &record.thread_name {
            insert_dotted(
                &mut event,
                "process.thread.name",
                Value::from(thread_name.as_str()),
            );
        }

        event
    }
}

impl Serializer for JsonEventLayout {
    fn format(&self, record: &Record) -> Result<String, SerializeError> {
        Ok(serde_json::to_string(&Value::Object(self.to_event(record)))?)
    }
}
