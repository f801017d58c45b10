// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message-queue transport used by the RUM driver.
//!
//! [`QueueTransport`] is the seam between batching logic and the network.
//! [`SqsClient`] is the production implementation; tests substitute their
//! own recording transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod sigv4;
pub mod sqs;

pub use sigv4::Credentials;
pub use sqs::SqsClient;

/// One entry of a batch send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchEntry {
    pub id: String,
    pub message_body: String,
}

/// Acknowledgement of a single send.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SendMessageOutput {
    #[serde(rename = "MessageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "MD5OfMessageBody", default)]
    pub md5_of_message_body: Option<String>,
}

/// Acknowledgement of a batch send.
///
/// The queue may accept some entries and reject others in the same call;
/// both lists are passed through untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SendMessageBatchOutput {
    #[serde(rename = "Successful", default)]
    pub successful: Vec<BatchResultEntry>,
    #[serde(rename = "Failed", default)]
    pub failed: Vec<BatchResultErrorEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BatchResultEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "MessageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "MD5OfMessageBody", default)]
    pub md5_of_message_body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BatchResultErrorEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "SenderFault", default)]
    pub sender_fault: bool,
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
}

/// Errors produced by a queue transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("queue responded with {status}: {code}: {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid queue endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to sign request: {0}")]
    Signing(String),

    #[error("failed to encode request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Sends one message body to the queue.
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
    ) -> Result<SendMessageOutput, TransportError>;

    /// Sends all entries in one request.
    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<SendMessageBatchOutput, TransportError>;
}

/// Builds the HTTP client shared by the network drivers.
pub(crate) fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_entry_serialization() {
        let entry = BatchEntry {
            id: "abc-1-0".to_string(),
            message_body: "hello".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"Id":"abc-1-0","MessageBody":"hello"}"#
        );
    }

    #[test]
    fn test_batch_output_with_partial_failure() {
        let output: SendMessageBatchOutput = serde_json::from_str(
            r#"{
                "Successful": [{"Id": "a-1-0", "MessageId": "m-1", "MD5OfMessageBody": "x"}],
                "Failed": [{"Id": "b-1-1", "SenderFault": true, "Code": "InvalidMessageContents"}]
            }"#,
        )
        .unwrap();
        assert_eq!(output.successful.len(), 1);
        assert_eq!(output.failed[0].code, "InvalidMessageContents");
        assert!(output.failed[0].sender_fault);
        assert_eq!(output.failed[0].message, None);
    }

    #[test]
    fn test_empty_batch_output() {
        let output: SendMessageBatchOutput = serde_json::from_str("{}").unwrap();
        assert_eq!(output, SendMessageBatchOutput::default());
    }
}
