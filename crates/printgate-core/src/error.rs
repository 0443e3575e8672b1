// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printgate.

use thiserror::Error;

/// Top-level error type for all Printgate operations.
#[derive(Debug, Error)]
pub enum PrintgateError {
    // -- Submission errors (detected before a job is queued) --
    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template render failed: {0}")]
    TemplateRender(String),

    // -- Printer errors --
    #[error("printer fault: {0}")]
    PrinterFault(String),

    #[error("printer not found: {0}")]
    PrinterNotFound(String),

    #[error("print executor failed: {0}")]
    Executor(String),

    // -- Device protocol / relay --
    #[error("device protocol error: {0}")]
    Protocol(String),

    #[error("relay channel error: {0}")]
    Relay(String),

    // -- Task correlation --
    #[error("no completion registered for task {0}")]
    UnknownTask(String),

    #[error("task {0} is already queued or in flight")]
    DuplicateTask(String),

    // -- Storage / persistence --
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

impl PrintgateError {
    /// Stable name reported to relay peers as `errorType`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parameter(_) => "ParameterError",
            Self::TemplateNotFound(_) => "TemplateNotFound",
            Self::TemplateRender(_) => "TemplateRenderError",
            Self::PrinterFault(_) => "PrinterFault",
            Self::PrinterNotFound(_) => "PrinterNotFound",
            Self::Executor(_) => "ExecutorFailure",
            Self::Protocol(_) => "ProtocolError",
            Self::Relay(_) => "RelayError",
            Self::UnknownTask(_) => "UnknownTask",
            Self::DuplicateTask(_) => "DuplicateTask",
            Self::Persistence(_) => "PersistenceWarning",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::PlatformUnavailable => "PlatformUnavailable",
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_report_protocol_kind() {
        let err = PrintgateError::Protocol("connection refused".into());
        assert_eq!(err.kind(), "ProtocolError");
        assert_eq!(err.to_string(), "device protocol error: connection refused");
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert_eq!(open().unwrap_err().kind(), "IoError");
    }
}
