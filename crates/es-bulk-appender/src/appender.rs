// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing entry points.
//!
//! [`BulkAppender`] owns the buffer and the dispatcher thread. Producers call
//! [`BulkAppender::append`] or go through a cloned [`AppenderHandle`]; neither
//! ever blocks on the network. [`BulkAppender::shutdown`] closes the buffer,
//! waits for the final drain and joins the dispatcher.
//!
//! [`DirectAppender`] is the unbuffered variant: every record is posted on the
//! caller's thread before `append` returns.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = AppenderConfig::from_env()?;
//! let appender = BulkAppender::from_config(&config)?;
//! appender.append(Record::new(Level::Info, "billing", "invoice sent"));
//! appender.shutdown()?;
//! ```

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use crate::buffer::{BoundedEventBuffer, BufferClosed};
use crate::config::{AppenderConfig, DispatcherSettings};
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::error::AppenderError;
use crate::record::Record;
use crate::serializer::{JsonEventLayout, Serializer};
use crate::transport::{ElasticsearchTransport, Transport};

/// Cheap, cloneable producer side of a [`BulkAppender`].
#[derive(Debug, Clone)]
pub struct AppenderHandle {
    pub(crate) buffer: Arc<BoundedEventBuffer<Record>>,
}

impl AppenderHandle {
    /// Buffers a record for the next flush. Never blocks on I/O.
    ///
    /// After shutdown the record is discarded.
    pub fn append(&self, record: Record) {
        if let Err(BufferClosed(record)) = self.buffer.push(record) {
            debug!(
                "Discarding log record from '{}': appender is shut down",
                record.logger
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }
}

enum Worker {
    Running(JoinHandle<DispatchSummary>),
    Finished(DispatchSummary),
    Panicked,
}

pub struct BulkAppender {
    handle: AppenderHandle,
    worker: Mutex<Worker>,
}

impl BulkAppender {
    /// Creates the buffer and starts the dispatcher thread.
    pub fn start(
        settings: DispatcherSettings,
        serializer: impl Serializer + 'static,
        transport: impl Transport + 'static,
    ) -> Result<Self, AppenderError> {
        settings.validate()?;

        let buffer = Arc::new(BoundedEventBuffer::new(
            settings.capacity,
            settings.flush_threshold,
        ));
        let worker = Dispatcher::new(
            Arc::clone(&buffer),
            Box::new(serializer),
            Box::new(transport),
            settings.timeout,
        )
        .spawn()?;

        debug!(
            "Bulk appender started: threshold {}, capacity {}, timeout {:?}",
            settings.flush_threshold, settings.capacity, settings.timeout
        );

        Ok(Self {
            handle: AppenderHandle { buffer },
            worker: Mutex::new(Worker::Running(worker)),
        })
    }

    /// Starts an appender shipping [`JsonEventLayout`] events to the
    /// configured cluster.
    pub fn from_config(config: &AppenderConfig) -> Result<Self, AppenderError> {
        config.validate()?;
        let layout = layout_from_config(config)?;
        let transport = ElasticsearchTransport::new(config)?;
        Self::start(config.dispatcher, layout, transport)
    }

    pub fn append(&self, record: Record) {
        self.handle.append(record);
    }

    #[must_use]
    pub fn handle(&self) -> AppenderHandle {
        self.handle.clone()
    }

    /// Only affects when the dispatcher is woken next; buffered records stay.
    pub fn set_flush_threshold(&self, flush_threshold: usize) {
        self.handle.buffer.set_flush_threshold(flush_threshold);
    }

    pub fn flush_threshold(&self) -> usize {
        self.handle.buffer.flush_threshold()
    }

    /// Records currently waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.handle.buffer.size()
    }

    pub fn capacity(&self) -> usize {
        self.handle.buffer.capacity()
    }

    /// Whether the dispatcher is parked waiting for records, i.e. not in the
    /// middle of shipping a batch.
    pub fn is_idle(&self) -> bool {
        self.handle.buffer.is_dispatcher_waiting()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes the buffer, waits for the final flush and joins the dispatcher.
    ///
    /// Safe to call more than once and from several threads: the first caller
    /// joins, the others wait for it and get the same summary. A dispatcher
    /// that panicked is reported to the caller that joined it.
    pub fn shutdown(&self) -> Result<DispatchSummary, AppenderError> {
        self.handle.buffer.close();

        let mut worker = self.lock_worker();
        match mem::replace(&mut *worker, Worker::Panicked) {
            Worker::Running(join_handle) => match join_handle.join() {
                Ok(summary) => {
                    *worker = Worker::Finished(summary);
                    Ok(summary)
                }
                Err(_) => {
                    error!("Log dispatcher thread panicked, buffered records may be lost");
                    Err(AppenderError::DispatcherPanicked)
                }
            },
            Worker::Finished(summary) => {
                *worker = Worker::Finished(summary);
                Ok(summary)
            }
            Worker::Panicked => Ok(DispatchSummary::default()),
        }
    }
}

impl Drop for BulkAppender {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Error shutting down bulk appender: {}", e);
        }
    }
}

fn layout_from_config(config: &AppenderConfig) -> Result<JsonEventLayout, AppenderError> {
    let layout = JsonEventLayout::new(config.location_info);
    Ok(match &config.user_fields {
        Some(user_fields) => layout.with_user_fields(user_fields)?,
        None => layout,
    })
}

/// Posts each record synchronously on the caller's thread.
///
/// Failures are logged and never reach the producer.
pub struct DirectAppender {
    serializer: Box<dyn Serializer>,
    transport: ElasticsearchTransport,
}

impl DirectAppender {
    pub fn new(serializer: impl Serializer + 'static, transport: ElasticsearchTransport) -> Self {
        Self {
            serializer: Box::new(serializer),
            transport,
        }
    }

    pub fn from_config(config: &AppenderConfig) -> Result<Self, AppenderError> {
        config.validate()?;
        Ok(Self::new(
            layout_from_config(config)?,
            ElasticsearchTransport::new(config)?,
        ))
    }

    pub fn append(&self, record: &Record) {
        let payload = match self.serializer.format(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping log record from '{}': {}", record.logger, e);
                return;
            }
        };
        if let Err(e) = self.transport.index_document(&payload) {
            warn!("Failed to index log record from '{}': {}", record.logger, e);
        }
    }
}
