// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pluggable logging facade for serverless functions.
//!
//! Application code emits a leveled event once through [`Log`], which fans it
//! out to every registered [`Driver`]: the console, a Sentry-compatible
//! error-tracking service, or a batched real-user-monitoring queue backed by
//! Amazon SQS.
//!
//! ```rust,ignore
//! use serverless_log::{ExecutionContext, Level, Log};
//! use serde_json::json;
//!
//! let mut log = Log::new(ExecutionContext::backend());
//! log.register_type("console", &json!({}))?
//!     .register_type("rum", &json!({
//!         "queue_url": "https://sqs.us-east-1.amazonaws.com/123456789012/rum",
//!         "enabled": true,
//!     }))?;
//!
//! // fire and forget; keep the Dispatch to await per-driver outcomes
//! let _ = log.log("user signed in", Level::Info, Default::default());
//! // at the end of the invocation
//! log.flush().await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod level;
pub mod log;
pub mod logger;
pub mod message;
pub mod queue;

pub use config::LogConfig;
pub use context::ExecutionContext;
pub use driver::{Ack, Driver};
pub use error::Error;
pub use level::Level;
pub use log::{Dispatch, DriverOutcome, Log};
pub use message::{Context, Message};
