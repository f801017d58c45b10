// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Real-user-monitoring driver backed by an SQS queue.
//!
//! # Delivery
//!
//! - **Backend context**: messages are buffered and sent as one batch once
//!   the buffer holds `batch_size` messages, or when [`Driver::flush`] is
//!   called.
//! - **Any other context**: every message is sent on its own, right away,
//!   because the process may not live long enough to flush.
//! - **Disabled**: every call succeeds without touching the network.
//!
//! # Buffer
//!
//! The buffer lives behind an async mutex that stays locked for the whole
//! append-then-flush sequence, so reaching the threshold triggers exactly
//! one flush. A flush drains the buffer before the batch is sent; the
//! messages are gone whether the send succeeds, fails, times out or the
//! flushing future is dropped. [`FlushFailurePolicy::Retain`] puts them back
//! on failure instead, keeping at most `max_retained` messages; the oldest
//! are dropped first.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::context::ExecutionContext;
use crate::driver::{hash, Ack, Driver};
use crate::error::Error;
use crate::level::Level;
use crate::message::{Context, Message};
use crate::queue::{
    build_http_client, BatchEntry, Credentials, QueueTransport, SqsClient, TransportError,
};

/// Messages per batch. Also the SQS `SendMessageBatch` entry limit.
pub const BATCH_SIZE: usize = 10;

/// Default cap on the buffer under [`FlushFailurePolicy::Retain`].
pub const MAX_RETAINED: usize = BATCH_SIZE * 10;

/// What happens to a drained batch the queue did not accept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlushFailurePolicy {
    /// Drop the batch. Undelivered messages are lost.
    #[default]
    Discard,
    /// Put the batch back at the front of the buffer for the next flush.
    Retain,
}

impl FromStr for FlushFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discard" => Ok(FlushFailurePolicy::Discard),
            "retain" => Ok(FlushFailurePolicy::Retain),
            other => Err(format!(
                "Invalid flush failure policy '{other}'. Must be one of: discard, retain"
            )),
        }
    }
}

/// Settings of a [`RumQueueDriver`].
#[derive(Clone, Debug)]
pub struct RumQueueConfig {
    pub queue_url: String,
    pub enabled: bool,
    pub batch_size: usize,
    /// Per-call limit on transport requests. A timeout is a transport error.
    pub timeout: Option<Duration>,
    pub flush_failure_policy: FlushFailurePolicy,
    /// Most messages kept after failed flushes. At least `batch_size`.
    pub max_retained: usize,
    /// Sends requests here instead of the queue URL's origin.
    pub endpoint: Option<String>,
}

impl RumQueueConfig {
    #[must_use]
    pub fn new(queue_url: impl Into<String>, enabled: bool) -> Self {
        RumQueueConfig {
            queue_url: queue_url.into(),
            enabled,
            batch_size: BATCH_SIZE,
            timeout: None,
            flush_failure_policy: FlushFailurePolicy::Discard,
            max_retained: MAX_RETAINED,
            endpoint: None,
        }
    }
}

#[derive(Deserialize)]
struct RumQueueArgs {
    #[serde(alias = "queueUrl")]
    queue_url: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default, alias = "batchSize")]
    batch_size: Option<usize>,
    #[serde(default, alias = "timeoutMs")]
    timeout_ms: Option<u64>,
    #[serde(default, alias = "flushFailurePolicy")]
    flush_failure_policy: Option<String>,
    #[serde(default, alias = "maxRetained")]
    max_retained: Option<usize>,
    #[serde(default)]
    endpoint: Option<String>,
}

impl RumQueueConfig {
    /// Reads the declarative driver arguments found in boot configuration,
    /// e.g. `{"queue_url": "...", "enabled": true}`.
    pub fn from_args(args: &Value) -> Result<Self, Error> {
        let args = RumQueueArgs::deserialize(args).map_err(|e| {
            Error::invalid_argument(
                format!("{args} ({e})"),
                r#"{"queue_url": <string>, "enabled": <bool>}"#,
            )
        })?;

        let mut config = RumQueueConfig::new(args.queue_url, args.enabled);
        if let Some(batch_size) = args.batch_size {
            config.batch_size = batch_size;
        }
        config.timeout = args.timeout_ms.map(Duration::from_millis);
        if let Some(policy) = args.flush_failure_policy {
            config.flush_failure_policy = policy.parse().map_err(Error::InvalidConfig)?;
        }
        if let Some(max_retained) = args.max_retained {
            config.max_retained = max_retained;
        }
        config.endpoint = args.endpoint;
        Ok(config)
    }
}

pub struct RumQueueDriver {
    queue_url: String,
    region: String,
    execution_context: ExecutionContext,
    enabled: bool,
    batch_size: usize,
    timeout: Option<Duration>,
    flush_failure_policy: FlushFailurePolicy,
    max_retained: usize,
    transport: Arc<dyn QueueTransport>,
    batch: Mutex<Vec<Message>>,
}

impl RumQueueDriver {
    /// Builds the driver with an [`SqsClient`] bound to the queue's region,
    /// signing with credentials from the environment when present.
    pub fn new(config: RumQueueConfig, execution_context: ExecutionContext) -> Result<Self, Error> {
        let region = region_from_queue_url(&config.queue_url)?;
        let http_client = build_http_client(config.timeout).map_err(Error::HttpClient)?;
        let mut client = SqsClient::new(http_client, region.clone(), Credentials::from_env());
        if let Some(endpoint) = &config.endpoint {
            client = client.with_endpoint(endpoint.clone());
        }
        Self::build(config, execution_context, region, Arc::new(client))
    }

    pub fn with_transport(
        config: RumQueueConfig,
        execution_context: ExecutionContext,
        transport: Arc<dyn QueueTransport>,
    ) -> Result<Self, Error> {
        let region = region_from_queue_url(&config.queue_url)?;
        Self::build(config, execution_context, region, transport)
    }

    fn build(
        config: RumQueueConfig,
        execution_context: ExecutionContext,
        region: String,
        transport: Arc<dyn QueueTransport>,
    ) -> Result<Self, Error> {
        if config.batch_size == 0 || config.batch_size > BATCH_SIZE {
            return Err(Error::InvalidConfig(format!(
                "RUM batch size must be between 1 and {BATCH_SIZE}, got {}",
                config.batch_size
            )));
        }
        if config.max_retained < config.batch_size {
            return Err(Error::InvalidConfig(format!(
                "RUM max retained messages must be at least the batch size {}, got {}",
                config.batch_size, config.max_retained
            )));
        }

        Ok(RumQueueDriver {
            queue_url: config.queue_url,
            region,
            execution_context,
            enabled: config.enabled,
            batch_size: config.batch_size,
            timeout: config.timeout,
            flush_failure_policy: config.flush_failure_policy,
            max_retained: config.max_retained,
            transport,
            batch: Mutex::new(Vec::with_capacity(config.batch_size)),
        })
    }

    #[must_use]
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of messages waiting for the next flush.
    pub async fn pending(&self) -> usize {
        self.batch.lock().await.len()
    }

    async fn flush_locked(&self, batch: &mut Vec<Message>) -> Result<Option<Ack>, Error> {
        if !self.enabled || batch.is_empty() {
            return Ok(None);
        }

        let take = batch.len().min(self.batch_size);
        let messages: Vec<Message> = batch.drain(..take).collect();

        match self.send_message_batch(&messages).await {
            Ok(ack) => Ok(Some(ack)),
            Err(e) => {
                if self.flush_failure_policy == FlushFailurePolicy::Retain {
                    let mut restored = messages;
                    restored.append(batch);
                    *batch = restored;
                    debug!("RUM | Retained {take} messages after failed flush");
                    if batch.len() > self.max_retained {
                        let excess = batch.len() - self.max_retained;
                        *batch = batch.split_off(excess);
                        error!(
                            "RUM | Dropped {excess} oldest retained messages, backlog is capped at {}",
                            self.max_retained
                        );
                    }
                } else {
                    error!("RUM | Dropped {take} messages after failed flush: {e}");
                }
                Err(e)
            }
        }
    }

    async fn send_message(&self, message: &Message) -> Result<Option<Ack>, Error> {
        let body = message.to_body().map_err(|e| Error::FailedToSendMessage {
            queue_url: self.queue_url.clone(),
            body: format!("{message:?}"),
            source: TransportError::Serialize(e),
        })?;

        let result = self
            .with_timeout(self.transport.send_message(&self.queue_url, &body))
            .await;
        match result {
            Ok(output) => Ok(Some(Ack::Message(output))),
            Err(source) => Err(Error::FailedToSendMessage {
                queue_url: self.queue_url.clone(),
                body,
                source,
            }),
        }
    }

    async fn send_message_batch(&self, messages: &[Message]) -> Result<Ack, Error> {
        let failed = |source| Error::FailedToSendBatch {
            queue_url: self.queue_url.clone(),
            source,
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();

        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let body = message
                .to_body()
                .map_err(|e| failed(TransportError::Serialize(e)))?;
            entries.push(BatchEntry {
                id: format!("{}-{timestamp}-{index}", hash(&body)),
                message_body: body,
            });
        }

        debug!("RUM | Sending batch of {} messages", entries.len());
        self.with_timeout(self.transport.send_message_batch(&self.queue_url, &entries))
            .await
            .map(Ack::Batch)
            .map_err(failed)
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => call.await,
        }
    }
}

#[async_trait]
impl Driver for RumQueueDriver {
    fn name(&self) -> &'static str {
        "rum"
    }

    async fn log(
        &self,
        message: &Message,
        _level: Level,
        _context: &Context,
    ) -> Result<Option<Ack>, Error> {
        if !self.enabled {
            return Ok(None);
        }

        if !self.execution_context.is_backend {
            return self.send_message(message).await;
        }

        // Only retained failed batches can leave more than `batch_size` behind.
        let mut batch = self.batch.lock().await;
        batch.push(message.clone());
        if batch.len() >= self.batch_size {
            self.flush_locked(&mut batch).await
        } else {
            Ok(None)
        }
    }

    async fn flush(&self) -> Result<Option<Ack>, Error> {
        let mut batch = self.batch.lock().await;
        self.flush_locked(&mut batch).await
    }
}

/// Extracts the AWS region from an SQS queue URL such as
/// `https://sqs.us-east-1.amazonaws.com/123456789012/queue-name`.
pub fn region_from_queue_url(queue_url: &str) -> Result<String, Error> {
    let invalid = |reason: &str| Error::InvalidQueueUrl {
        queue_url: queue_url.to_string(),
        reason: reason.to_string(),
    };

    region_pattern()
        .map_err(|e| invalid(&e.to_string()))?
        .captures(queue_url)
        .and_then(|captures| captures.get(1))
        .map(|region| region.as_str().to_string())
        .ok_or_else(|| invalid("Unable to extract AWS region."))
}

fn region_pattern() -> Result<&'static Regex, regex::Error> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = RegexBuilder::new(r"\.([^.]+)\.amazonaws\.com/.*")
        .case_insensitive(true)
        .build()?;
    Ok(PATTERN.get_or_init(|| pattern))
}
