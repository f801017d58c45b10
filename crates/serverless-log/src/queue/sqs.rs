// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::queue::sigv4::{self, Credentials, SigningRequest};
use crate::queue::{
    BatchEntry, QueueTransport, SendMessageBatchOutput, SendMessageOutput, TransportError,
};

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "sqs";
const SEND_MESSAGE_TARGET: &str = "AmazonSQS.SendMessage";
const SEND_MESSAGE_BATCH_TARGET: &str = "AmazonSQS.SendMessageBatch";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageInput<'a> {
    queue_url: &'a str,
    message_body: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchInput<'a> {
    queue_url: &'a str,
    entries: &'a [BatchEntry],
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Amazon SQS client speaking the JSON 1.0 protocol.
///
/// Requests go to the origin of the queue URL unless an endpoint override is
/// set (local emulators, VPC endpoints). Without credentials requests are
/// sent unsigned.
#[derive(Clone, Debug)]
pub struct SqsClient {
    client: reqwest::Client,
    region: String,
    credentials: Option<Credentials>,
    endpoint: Option<String>,
}

impl SqsClient {
    #[must_use]
    pub fn new(client: reqwest::Client, region: String, credentials: Option<Credentials>) -> Self {
        SqsClient {
            client,
            region,
            credentials,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn endpoint_for(&self, queue_url: &str) -> Result<Url, TransportError> {
        let raw = self.endpoint.as_deref().unwrap_or(queue_url);
        let url = Url::parse(raw).map_err(|e| TransportError::InvalidEndpoint(format!("{raw}: {e}")))?;
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(TransportError::InvalidEndpoint(raw.to_string()));
        }
        Url::parse(&format!("{}/", origin.ascii_serialization()))
            .map_err(|e| TransportError::InvalidEndpoint(format!("{raw}: {e}")))
    }

    async fn call<I, O>(&self, queue_url: &str, target: &str, input: &I) -> Result<O, TransportError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let endpoint = self.endpoint_for(queue_url)?;
        let payload = serde_json::to_vec(input)?;

        let mut request = self
            .client
            .post(endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", target);

        if let Some(credentials) = &self.credentials {
            let host = match (endpoint.host_str(), endpoint.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => return Err(TransportError::InvalidEndpoint(endpoint.to_string())),
            };
            let signed = sigv4::sign(
                &SigningRequest {
                    host: &host,
                    headers: &[("content-type", CONTENT_TYPE), ("x-amz-target", target)],
                    payload: &payload,
                    region: &self.region,
                    service: SERVICE,
                },
                credentials,
                Utc::now(),
            )?;
            for (name, value) in signed {
                request = request.header(name, value);
            }
        }

        let response = request.body(payload).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!("RUM | {target} responded with {status}");

        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<ErrorBody>(&body) {
                Ok(error) => (
                    error
                        .error_type
                        .rsplit('#')
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    error.message,
                ),
                Err(_) => (String::new(), String::from_utf8_lossy(&body).into_owned()),
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl QueueTransport for SqsClient {
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
    ) -> Result<SendMessageOutput, TransportError> {
        self.call(
            queue_url,
            SEND_MESSAGE_TARGET,
            &SendMessageInput {
                queue_url,
                message_body: body,
            },
        )
        .await
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<SendMessageBatchOutput, TransportError> {
        self.call(
            queue_url,
            SEND_MESSAGE_BATCH_TARGET,
            &SendMessageBatchInput { queue_url, entries },
        )
        .await
    }
}
