// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics output of the facade itself.
//!
//! The facade reports its own failures (dropped batches, unreachable
//! drivers) through `tracing`. [`Formatter`] prefixes those lines with
//! `SERVERLESS_LOG` so they stand apart from application output in the
//! function's log stream:
//!
//! ```text
//! SERVERLESS_LOG | ERROR | RUM | Dropped 10 messages after failed flush: ...
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "SERVERLESS_LOG | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs a global subscriber using [`Formatter`] at `log_level`
/// (`trace`, `debug`, `info`, `warn` or `error`).
///
/// HTTP stack internals are silenced. Fails when the level does not parse
/// or a global subscriber is already installed.
pub fn init(log_level: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}"))
        .map_err(|e| Error::InvalidConfig(format!("could not parse log level '{log_level}': {e}")))?;

    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter)
        .try_init()
        .map_err(|e| Error::InvalidConfig(format!("could not install subscriber: {e}")))
}
