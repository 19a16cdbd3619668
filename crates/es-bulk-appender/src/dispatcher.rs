// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background drain loop.
//!
//! The dispatcher is the only consumer of the [`BoundedEventBuffer`]. Each
//! cycle it waits for the flush threshold, the timeout or shutdown, takes
//! everything buffered, serializes it and hands the batch to the
//! [`Transport`]. Serialization and I/O always happen outside the buffer lock.
//!
//! Failures never stop the loop: a record that fails to serialize is skipped,
//! a batch the transport refuses is logged and discarded. The loop exits after
//! the first drain that observes the closed flag.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffer::BoundedEventBuffer;
use crate::error::AppenderError;
use crate::record::Record;
use crate::serializer::Serializer;
use crate::transport::Transport;

pub const DISPATCHER_THREAD_NAME: &str = "es-bulk-dispatcher";

/// Counters accumulated over the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub records_shipped: u64,
    /// Records the serializer could not format.
    pub records_skipped: u64,
    /// Records evicted from a full buffer before they could be drained.
    pub records_dropped: u64,
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batches sent, {} failed, {} records shipped, {} skipped, {} dropped",
            self.batches_sent,
            self.batches_failed,
            self.records_shipped,
            self.records_skipped,
            self.records_dropped
        )
    }
}

pub struct Dispatcher {
    buffer: Arc<BoundedEventBuffer<Record>>,
    serializer: Box<dyn Serializer>,
    transport: Box<dyn Transport>,
    timeout: Duration,
    summary: DispatchSummary,
}

impl Dispatcher {
    pub fn new(
        buffer: Arc<BoundedEventBuffer<Record>>,
        serializer: Box<dyn Serializer>,
        transport: Box<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            buffer,
            serializer,
            transport,
            timeout,
            summary: DispatchSummary::default(),
        }
    }

    /// Starts [`Dispatcher::run`] on its own named thread.
    pub fn spawn(self) -> Result<JoinHandle<DispatchSummary>, AppenderError> {
        thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(AppenderError::Spawn)
    }

    /// Runs the drain loop on the calling thread until the buffer is closed
    /// and its remainder has been shipped.
    pub fn run(mut self) -> DispatchSummary {
        debug!("Dispatcher started, flush timeout {:?}", self.timeout);
        loop {
            let drained = self.buffer.wait_for_batch(self.timeout);

            if drained.dropped > 0 {
                warn!(
                    "Buffer overflow: dropped {} oldest log records since the last flush",
                    drained.dropped
                );
                self.summary.records_dropped += drained.dropped;
            }

            if !drained.records.is_empty() {
                self.ship(&drained.records);
            }

            if drained.closed {
                break;
            }
        }
        debug!("Dispatcher stopped: {}", self.summary);
        self.summary
    }

    fn ship(&mut self, records: &[Record]) {
        let mut payloads = Vec::with_capacity(records.len());
        for record in records {
            match self.serializer.format(record) {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    warn!("Skipping log record from '{}': {}", record.logger, e);
                    self.summary.records_skipped += 1;
                }
            }
        }

        if payloads.is_empty() {
            return;
        }

        match self.transport.send_batch(&payloads) {
            Ok(()) => {
                debug!("Flushed batch of {} records", payloads.len());
                self.summary.batches_sent += 1;
                self.summary.records_shipped += payloads.len() as u64;
            }
            Err(e) => {
                warn!("Failed to ship batch of {} records: {}", payloads.len(), e);
                self.summary.batches_failed += 1;
            }
        }
    }
}
