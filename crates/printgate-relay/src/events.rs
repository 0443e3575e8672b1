// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event frames exchanged over the relay channel.
//
// Every frame is one JSON object per line:
//
//   inbound   {"event": "ippPrint", "replyId": "r1", "token": "..", "data": {..}}
//   outbound  {"event": "ippPrinterCallback", "data": {"replyId": "r1", ..}}
//
// A request that produces an asynchronous result carries a caller-chosen
// `replyId`, either on the frame or inside `data`. The result echoes it
// unchanged, error or not.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{PrinterRecord, TaskId};
use printgate_print::JobResult;

use crate::host::HostIdentity;

/// One inbound frame, from either a local caller or the transit relay.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InboundFrame {
    pub event: String,
    #[serde(rename = "replyId")]
    reply_id: Option<Value>,
    pub token: Option<String>,
    pub data: Value,
}

impl InboundFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ..Self::default()
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let frame: Self = serde_json::from_str(line)?;
        if frame.event.is_empty() {
            return Err(PrintgateError::Relay("frame carries no event name".into()));
        }
        Ok(frame)
    }

    /// The caller's correlation token: the frame-level `replyId`, else the
    /// one inside `data`. Numeric tokens are rendered as text.
    pub fn reply_id(&self) -> Option<String> {
        self.reply_id
            .as_ref()
            .and_then(reply_token)
            .or_else(|| self.data.get("replyId").and_then(reply_token))
    }
}

fn reply_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Result of a relay-forwarded device call (`ippPrint` / `ippRequest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCallback {
    /// Always present on the wire, `null` when the caller sent none.
    pub reply_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl DeviceCallback {
    pub fn answered(reply_id: Option<String>, response: Value) -> Self {
        Self {
            reply_id,
            error_type: None,
            error_message: None,
            response: Some(response),
        }
    }

    pub fn failed(reply_id: Option<String>, err: &PrintgateError) -> Self {
        Self {
            reply_id,
            error_type: Some(err.kind().to_owned()),
            error_message: Some(err.to_string()),
            response: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_type.is_some()
    }
}

/// Device session details announced before an `ippPrint` executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterConnected {
    pub reply_id: Option<String>,
    pub printer: DeviceSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub url: String,
    pub version: String,
}

/// Terminal outcome of a relay-submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobNotice {
    pub task_id: TaskId,
    pub socket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub msg: String,
}

/// Everything this process emits towards the transit relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    Auth { token: String },
    ClientInfo(HostIdentity),
    PrinterList(Vec<PrinterRecord>),
    IppPrinterConnected(PrinterConnected),
    IppPrinterCallback(DeviceCallback),
    IppRequestCallback(DeviceCallback),
    Success(JobNotice),
    Error(JobNotice),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::ClientInfo(_) => "clientInfo",
            Self::PrinterList(_) => "printerList",
            Self::IppPrinterConnected(_) => "ippPrinterConnected",
            Self::IppPrinterCallback(_) => "ippPrinterCallback",
            Self::IppRequestCallback(_) => "ippRequestCallback",
            Self::Success(_) => "success",
            Self::Error(_) => "error",
        }
    }

    /// `success` or `error` for a finished job.
    pub fn job_result(result: JobResult) -> Self {
        let notice = JobNotice {
            task_id: result.task_id,
            socket_id: result.socket_id,
            reply_id: result.reply_id,
            template_id: result.template_id,
            msg: result.msg,
        };
        if result.success {
            Self::Success(notice)
        } else {
            Self::Error(notice)
        }
    }
}

/// Somewhere outbound events can be written.
pub trait RelaySink: Send + Sync {
    fn emit(&self, event: OutboundEvent) -> Result<()>;
}
