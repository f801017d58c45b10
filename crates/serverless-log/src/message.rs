// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::{Map, Value};

/// Free-form key-value context attached to an event.
pub type Context = Map<String, Value>;

/// Payload of a log event.
///
/// Text is delivered as-is; structured payloads are serialized to JSON text
/// before they leave the process.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Text(String),
    Structured(Value),
}

impl Message {
    /// Wire form of the message body.
    ///
    /// A structured payload holding a bare JSON string is delivered as that
    /// string, unquoted.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        match self {
            Message::Text(text) | Message::Structured(Value::String(text)) => Ok(text.clone()),
            Message::Structured(value) => serde_json::to_string(value),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Structured(value)
    }
}
