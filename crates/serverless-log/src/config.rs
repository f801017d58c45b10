// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::driver::console::Stream;
use crate::driver::rum_queue::{FlushFailurePolicy, BATCH_SIZE, MAX_RETAINED};
use crate::error::Error;

/// Configuration for the logging facade and its drivers
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Where the function runs; decides batching and the error-tracking variant
    pub execution_context: ExecutionContext,
    /// Level of the facade's own diagnostics (trace, debug, info, warn, error)
    pub log_level: String,
    /// Whether to register the console driver
    pub console: bool,
    pub console_stream: Stream,
    /// Error-tracking DSN; registers the error-tracking driver when set
    pub sentry_dsn: Option<String>,
    /// RUM queue URL; registers the queue driver when set
    pub rum_queue_url: Option<String>,
    pub rum_enabled: bool,
    pub rum_batch_size: usize,
    /// Per-request timeout for queue calls
    pub rum_timeout: Option<Duration>,
    pub rum_flush_failure_policy: FlushFailurePolicy,
    /// Backlog cap under the retain policy
    pub rum_max_retained: usize,
    /// Queue endpoint override (local emulators, VPC endpoints)
    pub rum_endpoint: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            execution_context: ExecutionContext::backend(),
            log_level: "info".to_string(),
            console: true,
            console_stream: Stream::Auto,
            sentry_dsn: None,
            rum_queue_url: None,
            rum_enabled: false,
            rum_batch_size: BATCH_SIZE,
            rum_timeout: None,
            rum_flush_failure_policy: FlushFailurePolicy::Discard,
            rum_max_retained: MAX_RETAINED,
            rum_endpoint: None,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup, e.g. a map in tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let flag = |key: &str, default: bool| {
            non_empty(key)
                .map(|value| value.trim().to_lowercase() != "false")
                .unwrap_or(default)
        };

        let execution_context: ExecutionContext = match non_empty("SERVERLESS_LOG_CONTEXT") {
            Some(value) => value.parse().map_err(Error::InvalidConfig)?,
            None => defaults.execution_context,
        };
        let console_stream: Stream = match non_empty("SERVERLESS_LOG_CONSOLE_STREAM") {
            Some(value) => value.parse().map_err(Error::InvalidConfig)?,
            None => defaults.console_stream,
        };
        let rum_batch_size = match non_empty("RUM_BATCH_SIZE") {
            Some(value) => value.trim().parse::<usize>().map_err(|e| {
                Error::InvalidConfig(format!("RUM_BATCH_SIZE '{value}' is not a number: {e}"))
            })?,
            None => defaults.rum_batch_size,
        };
        let rum_max_retained = match non_empty("RUM_MAX_RETAINED") {
            Some(value) => value.trim().parse::<usize>().map_err(|e| {
                Error::InvalidConfig(format!("RUM_MAX_RETAINED '{value}' is not a number: {e}"))
            })?,
            None => defaults.rum_max_retained,
        };
        let rum_timeout = match non_empty("RUM_TIMEOUT_MS") {
            Some(value) => Some(Duration::from_millis(value.trim().parse::<u64>().map_err(
                |e| Error::InvalidConfig(format!("RUM_TIMEOUT_MS '{value}' is not a number: {e}")),
            )?)),
            None => defaults.rum_timeout,
        };
        let rum_flush_failure_policy: FlushFailurePolicy = match non_empty("RUM_FLUSH_FAILURE_POLICY") {
            Some(value) => value.parse().map_err(Error::InvalidConfig)?,
            None => defaults.rum_flush_failure_policy,
        };

        let config = Self {
            execution_context,
            log_level: non_empty("SERVERLESS_LOG_LEVEL")
                .map(|value| value.to_lowercase())
                .unwrap_or(defaults.log_level),
            console: flag("SERVERLESS_LOG_CONSOLE", defaults.console),
            console_stream,
            sentry_dsn: non_empty("SENTRY_DSN"),
            rum_queue_url: non_empty("RUM_QUEUE_URL"),
            rum_enabled: flag("RUM_ENABLED", defaults.rum_enabled),
            rum_batch_size,
            rum_timeout,
            rum_flush_failure_policy,
            rum_max_retained,
            rum_endpoint: non_empty("RUM_SQS_ENDPOINT"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.rum_batch_size == 0 || self.rum_batch_size > BATCH_SIZE {
            return Err(Error::InvalidConfig(format!(
                "RUM batch size must be between 1 and {BATCH_SIZE}, got {}",
                self.rum_batch_size
            )));
        }

        if self.rum_max_retained < self.rum_batch_size {
            return Err(Error::InvalidConfig(format!(
                "RUM max retained messages must be at least the batch size {}, got {}",
                self.rum_batch_size, self.rum_max_retained
            )));
        }

        if self.rum_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "RUM timeout must be greater than 0".to_string(),
            ));
        }

        if self.rum_enabled && self.rum_queue_url.is_none() {
            return Err(Error::InvalidConfig(
                "RUM_ENABLED is set but RUM_QUEUE_URL is missing".to_string(),
            ));
        }

        Ok(())
    }
}
