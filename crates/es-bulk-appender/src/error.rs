// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::serializer::LayoutError;
use crate::transport::TransportError;

/// Errors surfaced to the host by the appender lifecycle
#[derive(Debug, thiserror::Error)]
pub enum AppenderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Dispatcher thread panicked")]
    DispatcherPanicked,

    #[error("Failed to build transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to build layout: {0}")]
    Layout(#[from] LayoutError),
}
