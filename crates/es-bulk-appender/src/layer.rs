// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration: ships the host application's events.
//!
//! ```rust,ignore
//! let appender = BulkAppender::from_config(&config)?;
//! tracing_subscriber::registry()
//!     .with(BulkLayer::new(appender.handle()))
//!     .init();
//! ```

use std::fmt;
use std::thread;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::appender::AppenderHandle;
use crate::dispatcher::DISPATCHER_THREAD_NAME;
use crate::record::{ErrorInfo, Level, Location, Record};

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Turns every `tracing` event into a [`Record`] and appends it.
///
/// Events emitted by this crate, or by anything running on the dispatcher
/// thread, are ignored; shipping them would feed the shipper its own output.
#[derive(Debug, Clone)]
pub struct BulkLayer {
    handle: AppenderHandle,
    location_info: bool,
}

impl BulkLayer {
    #[must_use]
    pub fn new(handle: AppenderHandle) -> Self {
        Self {
            handle,
            location_info: true,
        }
    }

    #[must_use]
    pub fn with_location_info(mut self, location_info: bool) -> Self {
        self.location_info = location_info;
        self
    }
}

fn is_own_event(target: &str) -> bool {
    target == CRATE_TARGET
        || target
            .strip_prefix(CRATE_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
        || thread::current().name() == Some(DISPATCHER_THREAD_NAME)
}

impl<S: Subscriber> Layer<S> for BulkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_event(metadata.target()) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut record = Record::new(
            Level::from(metadata.level()),
            metadata.target(),
            visitor.message,
        );
        record.fields = visitor.fields;
        record.error = visitor.error;
        if self.location_info {
            record.location = Some(Location {
                file: metadata.file().map(str::to_string),
                line: metadata.line(),
                function: metadata.module_path().map(str::to_string),
            });
        }

        self.handle.append(record);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Map<String, Value>,
    error: Option<ErrorInfo>,
}

impl EventVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(message) => message,
                other => other.to_string(),
            };
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.error.is_none() {
            self.error = Some(ErrorInfo::from_error(value));
        } else {
            self.insert(field, Value::from(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{value:?}")));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::BoundedEventBuffer;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(location_info: bool, emit: impl FnOnce()) -> Vec<Record> {
        let buffer = Arc::new(BoundedEventBuffer::new(64, 64));
        let handle = AppenderHandle {
            buffer: Arc::clone(&buffer),
        };
        let subscriber = tracing_subscriber::registry()
            .with(BulkLayer::new(handle).with_location_info(location_info));
        tracing::subscriber::with_default(subscriber, emit);
        buffer.drain_all()
    }

    #[test]
    fn test_event_becomes_record() {
        let records = capture(true, || {
            tracing::warn!(target: "billing", invoice = 42, paid = false, "invoice {} late", 42);
        });

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, Level::Warn);
        assert_eq!(record.logger, "billing");
        assert_eq!(record.message, "invoice 42 late");
        assert_eq!(record.fields["invoice"], Value::from(42));
        assert_eq!(record.fields["paid"], Value::from(false));
        assert!(!record.fields.contains_key("message"));

        let location = record.location.as_ref().unwrap();
        assert!(location.file.as_deref().unwrap().ends_with("layer.rs"));
        assert!(location.line.is_some());
    }

    #[test]
    fn test_location_can_be_disabled() {
        let records = capture(false, || tracing::info!(target: "app", "hello"));
        assert!(records[0].location.is_none());
    }

    #[test]
    fn test_error_field_becomes_error_info() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "config missing");
        let records = capture(true, || {
            tracing::error!(
                target: "app",
                error = &io_error as &(dyn std::error::Error + 'static),
                "startup failed"
            );
        });

        let error = records[0].error.as_ref().unwrap();
        assert_eq!(error.message.as_deref(), Some("config missing"));
    }

    #[test]
    fn test_own_events_are_ignored() {
        let records = capture(true, || {
            tracing::warn!(target: "es_bulk_appender::dispatcher", "dropped records");
            tracing::info!(target: "es_bulk_appender_extras", "not ours");
        });

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].logger, "es_bulk_appender_extras");
    }

    #[test]
    fn test_events_on_dispatcher_thread_are_ignored() {
        let records = capture(true, || {
            let dispatch = tracing::dispatcher::get_default(Clone::clone);
            thread::Builder::new()
                .name(DISPATCHER_THREAD_NAME.to_string())
                .spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || {
                        tracing::info!(target: "hyper", "connection closed");
                    });
                })
                .unwrap()
                .join()
                .unwrap();
        });

        assert!(records.is_empty());
    }
}
