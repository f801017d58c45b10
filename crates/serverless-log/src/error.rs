// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::queue::TransportError;

/// Errors raised while registering drivers or delivering events
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument '{got}', expected {expected}")]
    InvalidArgument { got: String, expected: String },

    #[error("Invalid SQS queue url '{queue_url}': {reason}")]
    InvalidQueueUrl { queue_url: String, reason: String },

    #[error("Failed to send message to SQS queue '{queue_url}' (body: {body}): {source}")]
    FailedToSendMessage {
        queue_url: String,
        body: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to send message batch to SQS queue '{queue_url}': {source}")]
    FailedToSendBatch {
        queue_url: String,
        #[source]
        source: TransportError,
    },

    #[error("Invalid DSN '{dsn}': {reason}")]
    InvalidDsn { dsn: String, reason: String },

    #[error("Failed to report event to error tracking: {0}")]
    ErrorTracking(String),

    #[error("Failed to write to console: {0}")]
    Console(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Driver task failed: {0}")]
    DriverTask(String),
}

impl Error {
    pub(crate) fn invalid_argument(got: impl Into<String>, expected: impl Into<String>) -> Self {
        Error::InvalidArgument {
            got: got.into(),
            expected: expected.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let error = Error::invalid_argument("syslog", "[Console, Raven, Sentry, Rum]");
        assert_eq!(
            error.to_string(),
            "Invalid argument 'syslog', expected [Console, Raven, Sentry, Rum]"
        );
    }

    #[test]
    fn test_batch_error_keeps_cause() {
        let error = Error::FailedToSendBatch {
            queue_url: "https://sqs.eu-west-1.amazonaws.com/1/q".to_string(),
            source: TransportError::Timeout(Duration::from_millis(250)),
        };
        assert!(error.to_string().contains("eu-west-1"));
        assert!(error
            .source()
            .map(|cause| cause.to_string().contains("250ms"))
            .unwrap_or(false));
    }

    #[test]
    fn test_single_error_carries_body() {
        let error = Error::FailedToSendMessage {
            queue_url: "q".to_string(),
            body: r#"{"event":"click"}"#.to_string(),
            source: TransportError::Timeout(Duration::from_secs(1)),
        };
        assert!(error.to_string().contains(r#"{"event":"click"}"#));
    }
}
