// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::MAX_CAPACITY;
use crate::error::AppenderError;
use reqwest::Url;
use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_PROTOCOL: &str = "http";
pub const DEFAULT_SERVER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9200;
pub const DEFAULT_INDEX: &str = "logs";
pub const DEFAULT_FLUSH_THRESHOLD: usize = 128;
pub const DEFAULT_CAPACITY: usize = 4096;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Sizing of the buffer and pacing of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Buffered count that wakes the dispatcher before the timeout.
    pub flush_threshold: usize,
    /// Hard bound on buffered records; the oldest is dropped beyond it. At
    /// most [`MAX_CAPACITY`].
    pub capacity: usize,
    /// Longest wait before whatever is buffered gets shipped. Zero disables
    /// the timed flush.
    pub timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            capacity: DEFAULT_CAPACITY,
            timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl DispatcherSettings {
    pub fn validate(&self) -> Result<(), AppenderError> {
        if self.flush_threshold == 0 {
            return Err(AppenderError::InvalidConfig(
                "flush threshold must be greater than 0".to_string(),
            ));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(AppenderError::InvalidConfig(format!(
                "buffer capacity ({}) must not exceed {}",
                self.capacity, MAX_CAPACITY
            )));
        }
        if self.capacity < self.flush_threshold {
            return Err(AppenderError::InvalidConfig(format!(
                "buffer capacity ({}) must be at least the flush threshold ({})",
                self.capacity, self.flush_threshold
            )));
        }
        Ok(())
    }
}

/// Configuration for shipping to an Elasticsearch cluster
#[derive(Clone)]
pub struct AppenderConfig {
    /// `http` or `https`
    pub protocol: String,
    pub server: String,
    pub port: u16,
    pub index: String,
    /// Legacy mapping type. `None` targets the typeless endpoints.
    pub doc_type: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub dispatcher: DispatcherSettings,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Whether events carry file, line and function of the log call
    pub location_info: bool,
    /// `key:value` pairs added to every event
    pub user_fields: Option<String>,
    /// Log level of the shipper's own diagnostics
    pub log_level: String,
}

impl fmt::Debug for AppenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppenderConfig")
            .field("protocol", &self.protocol)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("index", &self.index)
            .field("doc_type", &self.doc_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dispatcher", &self.dispatcher)
            .field("request_timeout", &self.request_timeout)
            .field("https_proxy", &self.https_proxy)
            .field("location_info", &self.location_info)
            .field("user_fields", &self.user_fields)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            index: DEFAULT_INDEX.to_string(),
            doc_type: None,
            username: None,
            password: None,
            dispatcher: DispatcherSettings::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            https_proxy: None,
            location_info: true,
            user_fields: None,
            log_level: "info".to_string(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

impl AppenderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, AppenderError> {
        let defaults = Self::default();

        let protocol = non_empty_var("ES_PROTOCOL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.protocol);
        let server = non_empty_var("ES_SERVER").unwrap_or(defaults.server);
        let port = env::var("ES_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let index = non_empty_var("ES_INDEX").unwrap_or(defaults.index);
        let doc_type = non_empty_var("ES_DOC_TYPE");
        let username = non_empty_var("ES_USERNAME");
        let password = env::var("ES_PASSWORD").ok();

        let flush_threshold = env::var("ES_FLUSH_THRESHOLD")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_FLUSH_THRESHOLD);
        let capacity = env::var("ES_BUFFER_CAPACITY")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CAPACITY);
        let timeout = env::var("ES_FLUSH_TIMEOUT_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FLUSH_TIMEOUT);
        let request_timeout = env::var("ES_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let https_proxy = non_empty_var("ES_PROXY_HTTPS").or_else(|| non_empty_var("HTTPS_PROXY"));
        let location_info = env::var("ES_LOCATION_INFO")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(true);
        let user_fields = non_empty_var("ES_USER_FIELDS");
        let log_level = env::var("ES_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            protocol,
            server,
            port,
            index,
            doc_type,
            username,
            password,
            dispatcher: DispatcherSettings {
                flush_threshold,
                capacity,
                timeout,
            },
            request_timeout,
            https_proxy,
            location_info,
            user_fields,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AppenderError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(AppenderError::InvalidConfig(format!(
                "Invalid protocol '{}'. Must be one of: http, https",
                self.protocol
            )));
        }

        if self.port == 0 {
            return Err(AppenderError::InvalidConfig(
                "Port must be greater than 0".to_string(),
            ));
        }

        if self.server.trim().is_empty() {
            return Err(AppenderError::InvalidConfig(
                "ES_SERVER cannot be empty".to_string(),
            ));
        }

        if self.index.trim().is_empty() {
            return Err(AppenderError::InvalidConfig(
                "ES_INDEX cannot be empty".to_string(),
            ));
        }

        self.dispatcher.validate()?;

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(AppenderError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        self.bulk_url()?;
        Ok(())
    }

    /// Credentials for basic auth; only when both halves are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// `{protocol}://{server}:{port}/{index}/[{doc_type}/]`
    fn base_url(&self) -> Result<Url, AppenderError> {
        let mut url = format!(
            "{}://{}:{}/{}/",
            self.protocol, self.server, self.port, self.index
        );
        if let Some(doc_type) = &self.doc_type {
            url.push_str(doc_type);
            url.push('/');
        }
        Url::parse(&url)
            .map_err(|e| AppenderError::InvalidConfig(format!("Invalid endpoint URL '{url}': {e}")))
    }

    pub fn bulk_url(&self) -> Result<Url, AppenderError> {
        self.base_url()?
            .join("_bulk")
            .map_err(|e| AppenderError::InvalidConfig(format!("Invalid bulk URL: {e}")))
    }

    /// Single-document endpoint: `.../{index}/{doc_type}/`, or
    /// `.../{index}/_doc` when typeless.
    pub fn document_url(&self) -> Result<Url, AppenderError> {
        let base = self.base_url()?;
        if self.doc_type.is_some() {
            return Ok(base);
        }
        base.join("_doc")
            .map_err(|e| AppenderError::InvalidConfig(format!("Invalid document URL: {e}")))
    }
}
