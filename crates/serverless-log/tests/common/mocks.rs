// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of driver seams for testing

use serverless_log::queue::{
    BatchEntry, QueueTransport, SendMessageBatchOutput, SendMessageOutput, TransportError,
};
use std::sync::Mutex;

/// Queue transport that records every call and fails on demand
#[derive(Default)]
pub struct MockQueueTransport {
    pub fail: bool,
    pub singles: Mutex<Vec<String>>,
    pub batches: Mutex<Vec<Vec<BatchEntry>>>,
}

#[allow(dead_code)]
impl MockQueueTransport {
    pub fn failing() -> Self {
        MockQueueTransport {
            fail: true,
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<BatchEntry>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn singles(&self) -> Vec<String> {
        self.singles.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl QueueTransport for MockQueueTransport {
    async fn send_message(
        &self,
        _queue_url: &str,
        body: &str,
    ) -> Result<SendMessageOutput, TransportError> {
        self.singles.lock().unwrap().push(body.to_string());
        if self.fail {
            return Err(TransportError::Decode("mock failure".to_string()));
        }
        Ok(SendMessageOutput::default())
    }

    async fn send_message_batch(
        &self,
        _queue_url: &str,
        entries: &[BatchEntry],
    ) -> Result<SendMessageBatchOutput, TransportError> {
        self.batches.lock().unwrap().push(entries.to_vec());
        if self.fail {
            return Err(TransportError::Decode("mock failure".to_string()));
        }
        Ok(SendMessageBatchOutput::default())
    }
}
