// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Elasticsearch bulk appender
//!
//! Ships application log records to the Elasticsearch `_bulk` API without
//! blocking the threads that produce them.
//!
//! ## Overview
//!
//! - [`buffer`]: bounded FIFO shared by producers and the dispatcher; the
//!   oldest record is dropped and counted when it is full
//! - [`dispatcher`]: background thread that flushes on threshold, timeout or
//!   shutdown
//! - [`appender`]: [`BulkAppender`] lifecycle and producer handles, plus the
//!   synchronous [`DirectAppender`]
//! - [`serializer`] / [`transport`]: record formatting and delivery seams
//! - [`layer`]: `tracing` integration
//!
//! Delivery is best effort. Failed batches are logged and discarded, never
//! retried.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod appender;
pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod http;
pub mod layer;
pub mod record;
pub mod serializer;
pub mod transport;

pub use appender::{AppenderHandle, BulkAppender, DirectAppender};
pub use config::{AppenderConfig, DispatcherSettings};
pub use dispatcher::DispatchSummary;
pub use error::AppenderError;
pub use layer::BulkLayer;
pub use record::{ErrorInfo, Level, Location, Record};
pub use serializer::{JsonEventLayout, Serializer};
pub use transport::{ElasticsearchTransport, Transport, TransportError};
