// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the Elasticsearch transport.
//!
//! The client honours the request timeout and HTTPS proxy from
//! [`AppenderConfig`]. An unusable proxy is logged and the client is rebuilt
//! without it, so a bad proxy setting degrades to a direct connection instead
//! of disabling shipping.

use crate::config::AppenderConfig;
use core::time::Duration;
use std::error::Error;
use tracing::error;

/// Creates a configured HTTP client, falling back to a direct connection
/// when the proxy configuration is rejected.
#[must_use]
pub fn get_client(config: &AppenderConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &AppenderConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_without_proxy() {
        let config = AppenderConfig::default();
        assert!(build_client(&config, true).is_ok());
    }

    #[test]
    fn test_build_client_with_proxy() {
        let config = AppenderConfig {
            https_proxy: Some("http://proxy.internal:3128".to_string()),
            ..Default::default()
        };
        assert!(build_client(&config, true).is_ok());
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let config = AppenderConfig {
            https_proxy: Some("http://[not-an-ip".to_string()),
            ..Default::default()
        };
        assert!(build_client(&config, true).is_err());
        assert!(build_client(&config, false).is_ok());
    }

    #[test]
    fn test_get_client_falls_back_on_invalid_proxy() {
        let config = AppenderConfig {
            https_proxy: Some("http://[not-an-ip".to_string()),
            ..Default::default()
        };
        let _client = get_client(&config);
    }
}
