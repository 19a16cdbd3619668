// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Reads log lines from stdin and ships them to Elasticsearch.
//!
//! A line may start with a level word (`WARN disk almost full`); otherwise it
//! is shipped at `INFO`. Configuration comes from the `ES_*` environment
//! variables; `ES_LOGGER` names the logger (default `stdin`).

use std::env;
use std::io::{self, BufRead};
use std::process::ExitCode;

use es_bulk_appender::{AppenderConfig, BulkAppender, Level, Record};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOGGER: &str = "stdin";

fn parse_line(logger: &str, line: &str) -> Record {
    if let Some((first, rest)) = line.split_once(' ') {
        if let Ok(level) = first.trim_end_matches(':').parse::<Level>() {
            return Record::new(level, logger, rest.trim_start());
        }
    }
    Record::new(Level::Info, logger, line)
}

fn main() -> ExitCode {
    let log_level = env::var("ES_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match AppenderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let logger = env::var("ES_LOGGER").unwrap_or_else(|_| DEFAULT_LOGGER.to_string());

    let appender = match BulkAppender::from_config(&config) {
        Ok(appender) => appender,
        Err(e) => {
            error!("Unable to start appender: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Shipping stdin to {}:{} index '{}'",
        config.server, config.port, config.index
    );

    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => appender.append(parse_line(&logger, &line)),
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    match appender.shutdown() {
        Ok(summary) => {
            info!("Finished: {}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_level() {
        let record = parse_line("app", "WARN disk almost full");
        assert_eq!(record.level, Level::Warn);
        assert_eq!(record.message, "disk almost full");
        assert_eq!(record.logger, "app");
    }

    #[test]
    fn test_parse_line_with_colon_level() {
        let record = parse_line("app", "error: connection reset");
        assert_eq!(record.level, Level::Error);
        assert_eq!(record.message, "connection reset");
    }

    #[test]
    fn test_parse_line_without_level() {
        let record = parse_line("app", "plain text line");
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.message, "plain text line");
    }
}
