// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Captured log events.
//!
//! A [`Record`] is created on the producer thread at log-call time and is
//! immutable afterwards. The buffer and dispatcher never look inside it; only
//! the [`Serializer`](crate::serializer::Serializer) does.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Severity of a [`Record`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    #[display("TRACE")]
    Trace,
    #[display("DEBUG")]
    Debug,
    #[display("INFO")]
    Info,
    #[display("WARN")]
    Warn,
    #[display("ERROR")]
    Error,
    #[display("FATAL")]
    Fatal,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            _ => Level::Error,
        }
    }
}

/// Source location of the log call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

/// Error attached to a log event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: Option<String>,
    pub message: Option<String>,
    pub stack_trace: Vec<String>,
}

impl ErrorInfo {
    /// Captures an error and its `source()` chain; each cause becomes one
    /// stack trace line.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack_trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack_trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            kind: None,
            message: Some(err.to_string()),
            stack_trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub logger: String,
    pub message: String,
    pub thread_name: Option<String>,
    pub location: Option<Location>,
    pub error: Option<ErrorInfo>,
    pub fields: Map<String, Value>,
}

impl Record {
    /// Captures a new record, stamped with the current time and the name of
    /// the calling thread.
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            logger: logger.into(),
            message: message.into(),
            thread_name: std::thread::current().name().map(str::to_string),
            location: None,
            error: None,
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// Adds an extra field. Dotted keys end up nested in the JSON layout.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
