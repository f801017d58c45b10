// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for log events.

use async_trait::async_trait;

use crate::error::Error;
use crate::level::Level;
use crate::message::{Context, Message};
use crate::queue::{SendMessageBatchOutput, SendMessageOutput};

pub mod console;
pub mod error_tracking;
pub mod rum_queue;

pub use console::ConsoleDriver;
pub use error_tracking::ErrorTrackingDriver;
pub use rum_queue::RumQueueDriver;

/// What a destination reported back after accepting an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ack {
    Message(SendMessageOutput),
    Batch(SendMessageBatchOutput),
    Event { id: String },
}

/// Capability every log destination exposes.
///
/// `Ok(None)` means the event was accepted without anything to report,
/// which includes buffering it for later delivery and disabled drivers.
/// Implementations never panic; every failure is returned as an `Err`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short name used in diagnostics and dispatch outcomes.
    fn name(&self) -> &'static str;

    async fn log(
        &self,
        message: &Message,
        level: Level,
        context: &Context,
    ) -> Result<Option<Ack>, Error>;

    /// Delivers anything the driver is holding back.
    async fn flush(&self) -> Result<Option<Ack>, Error> {
        Ok(None)
    }
}

/// Lowercase hex MD5 digest of `content`, used to build idempotency ids.
#[must_use]
pub fn hash(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}
