// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printgate print mediator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a print task.
///
/// Opaque to the core: local submissions mint a dash-less UUID, relay peers
/// never choose it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Where a print job originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Submitted by a caller attached to this machine.
    Local,
    /// Forwarded by the transit relay.
    Transit,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Transit => "transit",
        }
    }
}

/// Persisted lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted and waiting for (or occupying) the print executor.
    Pending,
    /// The executor reported success.
    Completed,
    /// Printer fault, executor failure, or unresolved printer.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One entry of a printer-list snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterRecord {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Raw platform status code, read according to a [`StatusModel`].
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub is_default: bool,
}

impl PrinterRecord {
    pub fn new(name: impl Into<String>, status: i32, is_default: bool) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            status,
            is_default,
        }
    }
}

/// Convention a printer directory uses for [`PrinterRecord::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusModel {
    /// `PRINTER_INFO_2` status flags: zero means ready.
    Windows,
    /// CUPS/IPP `printer-state`: 3 is idle, 4 processing, 5 stopped.
    Cups,
}

impl StatusModel {
    /// The model used by the printer subsystem of the running OS.
    pub fn host() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Cups }
    }
}

/// Paper size as reported by a printer driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperSize {
    pub name: String,
    pub width_mm: f32,
    pub height_mm: f32,
}

/// Paper sizes supported by one printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperSizeInfo {
    pub printer: String,
    pub papers: Vec<PaperSize>,
}

/// Duplex printing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplexMode {
    Simplex,
    ShortEdge,
    LongEdge,
}

/// Page margins handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Margins {
    /// `default`, `none`, `printableArea` or `custom`.
    pub margin_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<f32>,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            margin_type: "none".into(),
            top: None,
            bottom: None,
            left: None,
            right: None,
        }
    }
}

/// Rendering and driver options for a job.
///
/// Fields missing from a submission take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub silent: bool,
    pub print_background: bool,
    pub color: bool,
    pub margins: Margins,
    pub landscape: bool,
    pub scale_factor: u32,
    pub pages_per_sheet: u32,
    pub collate: bool,
    pub copies: u32,
    pub page_ranges: Vec<PageRange>,
    pub duplex_mode: Option<DuplexMode>,
    pub dpi: Option<serde_json::Value>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub page_size: Option<serde_json::Value>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            silent: true,
            print_background: true,
            color: true,
            margins: Margins::default(),
            landscape: false,
            scale_factor: 100,
            pages_per_sheet: 1,
            collate: true,
            copies: 1,
            page_ranges: Vec::new(),
            duplex_mode: None,
            dpi: None,
            header: None,
            footer: None,
            page_size: None,
        }
    }
}

/// Inclusive page range (zero-based, as the renderer expects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: u32,
    pub to: u32,
}

/// Document content handed to the print executor unchanged.
///
/// The core never looks inside; only the executor interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(pub serde_json::Value);

/// A unit of print work, normalized from a local or relay submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub task_id: TaskId,
    pub client_type: ClientType,
    /// Requested printer; empty resolves to the platform default.
    pub printer_name: String,
    /// Display name recorded with the job.
    pub name: String,
    pub template_id: Option<String>,
    pub payload: JobPayload,
    pub options: RenderOptions,
    pub submitted_at: DateTime<Utc>,
    /// Relay connection the job arrived on (transit jobs only).
    pub socket_id: Option<String>,
    /// Caller correlation token echoed with the result (transit jobs only).
    pub reply_id: Option<String>,
}

impl JobDescriptor {
    pub fn local(printer_name: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            task_id: TaskId::generate(),
            client_type: ClientType::Local,
            printer_name: printer_name.into(),
            name: String::new(),
            template_id: None,
            payload,
            options: RenderOptions::default(),
            submitted_at: Utc::now(),
            socket_id: None,
            reply_id: None,
        }
    }

    pub fn transit(
        printer_name: impl Into<String>,
        payload: JobPayload,
        socket_id: impl Into<String>,
    ) -> Self {
        Self {
            client_type: ClientType::Transit,
            socket_id: Some(socket_id.into()),
            ..Self::local(printer_name, payload)
        }
    }
}

/// What the print executor is asked to do for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRequest {
    pub task_id: TaskId,
    /// Resolved device name (never empty).
    pub printer_name: String,
    pub options: RenderOptions,
    pub payload: JobPayload,
}

/// Terminal result reported by the print executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOutcome {
    pub success: bool,
    pub failure_reason: Option<String>,
    pub page_count: Option<u32>,
}

impl PrintOutcome {
    pub fn succeeded(page_count: Option<u32>) -> Self {
        Self {
            success: true,
            failure_reason: None,
            page_count,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            page_count: None,
        }
    }
}

/// Persisted record of a job, as returned by the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub task_id: TaskId,
    pub name: String,
    pub template_id: Option<String>,
    pub client_type: ClientType,
    pub print_time: DateTime<Utc>,
    pub print_status: JobStatus,
    pub msg: Option<String>,
}

impl JobRecord {
    /// A fresh `pending` record for a just-accepted job.
    pub fn pending(job: &JobDescriptor) -> Self {
        Self {
            task_id: job.task_id.clone(),
            name: job.name.clone(),
            template_id: job.template_id.clone(),
            client_type: job.client_type,
            print_time: job.submitted_at,
            print_status: JobStatus::Pending,
            msg: None,
        }
    }
}

/// State of the transit relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_task_ids_are_unique_and_dashless() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(!a.as_str().contains('-'));
    }

    #[test]
    fn render_options_fill_missing_fields_with_defaults() {
        let opts: RenderOptions =
            serde_json::from_str(r#"{"copies": 3, "duplexMode": "longEdge"}"#).unwrap();
        assert_eq!(opts.copies, 3);
        assert_eq!(opts.duplex_mode, Some(DuplexMode::LongEdge));
        assert!(opts.silent);
        assert_eq!(opts.scale_factor, 100);
        assert_eq!(opts.margins.margin_type, "none");
    }

    #[test]
    fn transit_descriptor_carries_socket_id() {
        let job = JobDescriptor::transit("", JobPayload::default(), "sock-1");
        assert_eq!(job.client_type, ClientType::Transit);
        assert_eq!(job.socket_id.as_deref(), Some("sock-1"));
        assert!(job.printer_name.is_empty());
    }

    #[test]
    fn job_status_round_trips_through_text() {
        for status in [JobStatus::Pending, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("cancelled"), None);
    }
}
