// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Static facts about the host, collected once and stamped on every event.

use std::env;
use tracing::warn;

const UNKNOWN_HOST: &str = "unknown-host";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostData {
    pub hostname: String,
    pub architecture: String,
    pub os_name: String,
    pub os_version: Option<String>,
    pub pid: u32,
}

impl HostData {
    #[must_use]
    pub fn collect() -> Self {
        Self {
            hostname: get_hostname(),
            architecture: env::consts::ARCH.to_string(),
            os_name: env::consts::OS.to_string(),
            os_version: os_release(),
            pid: std::process::id(),
        }
    }
}

/// Resolves the hostname: `HOSTNAME` first, then the system call, then
/// `unknown-host`.
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    if let Some(hostname) = system_hostname() {
        return hostname;
    }

    warn!("Could not determine hostname, using '{UNKNOWN_HOST}'");
    UNKNOWN_HOST.to_string()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname
            .to_str()
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    env::var("COMPUTERNAME").ok().filter(|name| !name.is_empty())
}

#[cfg(unix)]
fn os_release() -> Option<String> {
    nix::sys::utsname::uname()
        .ok()
        .and_then(|uts| uts.release().to_str().map(str::to_string))
}

#[cfg(not(unix))]
fn os_release() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_hostname_env_override() {
        env::set_var("HOSTNAME", "shipper-test-host");
        assert_eq!(get_hostname(), "shipper-test-host");
        env::remove_var("HOSTNAME");
    }

    #[test]
    #[serial]
    fn test_collect_fills_every_field() {
        let host = HostData::collect();
        assert!(!host.hostname.is_empty());
        assert_eq!(host.architecture, env::consts::ARCH);
        assert_eq!(host.os_name, env::consts::OS);
        assert_eq!(host.pid, std::process::id());
    }
}
