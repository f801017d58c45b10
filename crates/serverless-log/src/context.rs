// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;

/// Where the hosting process runs.
///
/// Supplied by the host once, at construction. Backend processes batch queue
/// messages; everything else sends them one by one because the process may
/// not live long enough to flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub is_backend: bool,
    pub is_frontend: bool,
}

impl ExecutionContext {
    #[must_use]
    pub const fn backend() -> Self {
        Self {
            is_backend: true,
            is_frontend: false,
        }
    }

    #[must_use]
    pub const fn frontend() -> Self {
        Self {
            is_backend: false,
            is_frontend: true,
        }
    }
}

impl FromStr for ExecutionContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backend" => Ok(Self::backend()),
            "frontend" => Ok(Self::frontend()),
            other => Err(format!(
                "Invalid execution context '{other}'. Must be one of: backend, frontend"
            )),
        }
    }
}
