//! Audit log entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Severity of an audit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("unknown log level: {}", other))),
        }
    }
}

/// Row of the general event log
#[derive(Debug, Clone, Serialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub module: String,
    pub created_at: DateTime<Utc>,
}

/// One request/response exchange with an external API
///
/// Request bodies must already have secrets stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResponseLog {
    pub level: LogLevel,
    pub message: String,
    pub module: String,
    pub request: Option<String>,
    pub response: Option<String>,
    pub api_name: Option<String>,
    pub login_seq_id: Option<String>,
}

impl RequestResponseLog {
    pub fn new(level: LogLevel, message: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            module: module.into(),
            request: None,
            response: None,
            api_name: None,
            login_seq_id: None,
        }
    }

    pub fn request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn api(mut self, api_name: impl Into<String>) -> Self {
        self.api_name = Some(api_name.into());
        self
    }

    pub fn sequence(mut self, login_seq_id: impl Into<String>) -> Self {
        self.login_seq_id = Some(login_seq_id.into());
        self
    }
}

/// Stored exchange as read back from the log
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub module: String,
    pub request: Option<String>,
    pub response: Option<String>,
    pub api_name: Option<String>,
    pub login_seq_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
