// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Mutex;

use crate::driver::{Ack, Driver};
use crate::error::Error;
use crate::level::Level;
use crate::message::{Context, Message};

/// Which standard stream the console driver writes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stream {
    /// stderr for `error` and worse, stdout otherwise.
    #[default]
    Auto,
    Stdout,
    Stderr,
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Stream::Auto),
            "stdout" => Ok(Stream::Stdout),
            "stderr" => Ok(Stream::Stderr),
            other => Err(format!("unknown console stream '{other}'")),
        }
    }
}

/// Writes one line per event to the process console.
pub struct ConsoleDriver {
    stream: Stream,
    // Set in tests to capture output instead of touching the real streams.
    sink: Option<Mutex<Box<dyn Write + Send>>>,
}

impl ConsoleDriver {
    #[must_use]
    pub fn new(stream: Stream) -> Self {
        ConsoleDriver { stream, sink: None }
    }

    /// Writes every line to `sink` regardless of level.
    #[must_use]
    pub fn with_writer(sink: Box<dyn Write + Send>) -> Self {
        ConsoleDriver {
            stream: Stream::Auto,
            sink: Some(Mutex::new(sink)),
        }
    }

    fn format_line(message: &Message, level: Level, context: &Context) -> io::Result<String> {
        let body = message.to_body()?;
        if context.is_empty() {
            Ok(format!("[{level}] {body}\n"))
        } else {
            Ok(format!("[{level}] {body} {}\n", serde_json::to_string(context)?))
        }
    }

    fn write_line(&self, line: &str, level: Level) -> io::Result<()> {
        if let Some(sink) = &self.sink {
            let mut sink = sink
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "console sink lock poisoned"))?;
            return sink.write_all(line.as_bytes());
        }

        let to_stderr = match self.stream {
            Stream::Auto => level.is_error_or_worse(),
            Stream::Stdout => false,
            Stream::Stderr => true,
        };
        if to_stderr {
            io::stderr().lock().write_all(line.as_bytes())
        } else {
            io::stdout().lock().write_all(line.as_bytes())
        }
    }
}

impl Default for ConsoleDriver {
    fn default() -> Self {
        ConsoleDriver::new(Stream::Auto)
    }
}

#[async_trait]
impl Driver for ConsoleDriver {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn log(
        &self,
        message: &Message,
        level: Level,
        context: &Context,
    ) -> Result<Option<Ack>, Error> {
        let line = Self::format_line(message, level, context)?;
        self.write_line(&line, level)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writes_level_message_and_context() {
        let buffer = SharedBuffer::default();
        let driver = ConsoleDriver::with_writer(Box::new(buffer.clone()));

        let mut context = Context::new();
        context.insert("request_id".to_string(), json!("abc"));
        driver
            .log(&Message::from("hello"), Level::Warning, &context)
            .await
            .unwrap();
        driver
            .log(&Message::from(json!({"n": 1})), Level::Debug, &Context::new())
            .await
            .unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            output,
            "[warning] hello {\"request_id\":\"abc\"}\n[debug] {\"n\":1}\n"
        );
    }

    #[test]
    fn test_stream_from_str() {
        assert_eq!("STDERR".parse::<Stream>().unwrap(), Stream::Stderr);
        assert!("file".parse::<Stream>().is_err());
    }
}
