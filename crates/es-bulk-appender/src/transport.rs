// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized events to Elasticsearch.
//!
//! [`Transport`] is the only thing the dispatcher knows about the network: it
//! receives a batch of wire payloads and reports success or failure.
//! [`ElasticsearchTransport`] posts batches to the `_bulk` API as NDJSON.
//!
//! The dispatcher runs on a plain OS thread, so the transport owns a
//! current-thread tokio runtime and blocks on each request. Calling it from
//! inside another tokio runtime is not supported.

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::config::AppenderConfig;
use crate::error::AppenderError;
use crate::http::get_client;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const INDEX_ACTION: &str = "{\"index\":{}}";

/// Delivers a batch of serialized events.
///
/// Called only from the dispatcher thread, never with an empty batch, and
/// never while the buffer lock is held.
pub trait Transport: Send {
    fn send_batch(&mut self, payloads: &[String]) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build transport runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Elasticsearch responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Elasticsearch rejected {failed} of {total} bulk items")]
    Rejected { failed: usize, total: usize },
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

impl BulkResponse {
    /// Items whose action result carries an `error` object.
    fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.values().any(|result| result.get("error").is_some()))
            .count()
    }
}

/// Builds the `_bulk` request body: an index action line before each payload,
/// every line newline-terminated.
pub(crate) fn build_bulk_body(payloads: &[String]) -> String {
    let capacity = payloads
        .iter()
        .map(|payload| payload.len() + INDEX_ACTION.len() + 2)
        .sum();
    let mut body = String::with_capacity(capacity);
    for payload in payloads {
        body.push_str(INDEX_ACTION);
        body.push('\n');
        body.push_str(payload.trim_end_matches('\n'));
        body.push('\n');
    }
    body
}

fn check_bulk_response(body: &str) -> Result<(), TransportError> {
    let response: BulkResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            debug!("Unparseable bulk response, assuming success: {}", e);
            return Ok(());
        }
    };

    if !response.errors {
        return Ok(());
    }

    Err(TransportError::Rejected {
        failed: response.failed_items(),
        total: response.items.len(),
    })
}

/// A failed status wins over a failed body read, so the status is never lost.
fn classify_bulk_response(
    status: StatusCode,
    body: Result<String, reqwest::Error>,
) -> Result<(), TransportError> {
    if !status.is_success() {
        return Err(TransportError::Status {
            status,
            body: body.unwrap_or_default(),
        });
    }
    check_bulk_response(&body?)
}

pub struct ElasticsearchTransport {
    client: reqwest::Client,
    runtime: Runtime,
    bulk_url: Url,
    document_url: Url,
    credentials: Option<(String, String)>,
}

impl ElasticsearchTransport {
    pub fn new(config: &AppenderConfig) -> Result<Self, AppenderError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;

        Ok(Self {
            client: get_client(config),
            runtime,
            bulk_url: config.bulk_url()?,
            document_url: config.document_url()?,
            credentials: config
                .credentials()
                .map(|(user, password)| (user.to_string(), password.to_string())),
        })
    }

    #[must_use]
    pub fn bulk_url(&self) -> &Url {
        &self.bulk_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    /// Posts one payload to the single-document endpoint.
    pub fn index_document(&self, payload: &str) -> Result<(), TransportError> {
        let request = self
            .authorize(self.client.post(self.document_url.clone()))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string());

        self.runtime.block_on(async move {
            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::Status { status, body })
        })
    }

    fn post_bulk(&self, body: String) -> Result<(), TransportError> {
        let request = self
            .authorize(self.client.post(self.bulk_url.clone()))
            .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body);

        self.runtime.block_on(async move {
            let response = request.send().await?;
            let status = response.status();
            classify_bulk_response(status, response.text().await)
        })
    }
}

impl Transport for ElasticsearchTransport {
    fn send_batch(&mut self, payloads: &[String]) -> Result<(), TransportError> {
        if payloads.is_empty() {
            return Ok(());
        }
        self.post_bulk(build_bulk_body(payloads))?;
        debug!("Shipped {} events to {}", payloads.len(), self.bulk_url);
        Ok(())
    }
}
