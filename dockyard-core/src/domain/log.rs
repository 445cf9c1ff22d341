//! Log domain types

use serde::{Deserialize, Serialize};

/// One entry in a build's log
///
/// Sequence numbers start at zero and increase by one per line within a
/// single build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: LogKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Progress or build tool output
    Info,
    /// A failed step; always the last line of its build
    Error,
    /// Success marker; always the last line of its build
    Terminal,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Error => "error",
            LogKind::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
