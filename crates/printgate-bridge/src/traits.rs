// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for native print capabilities.

use futures::future::BoxFuture;

use printgate_core::error::Result;
use printgate_core::types::{PaperSizeInfo, PrintOutcome, PrintRequest, PrinterRecord, StatusModel};

/// Unified bridge that groups the native capabilities the core depends on.
pub trait PlatformBridge: PrintExecutor + PrinterDirectory {
    /// Human-readable platform name (e.g. "Windows 11", "Linux (CUPS)").
    fn platform_name(&self) -> &str;
}

/// Renders a document and hands it to a printer driver.
///
/// The executor is a singleton resource: callers must not start a second
/// `print` before the previous future resolved. The job runner enforces this.
pub trait PrintExecutor: Send + Sync {
    /// Start printing. The returned future resolves once the driver reports
    /// a terminal outcome; it never resolves twice and never errors, failures
    /// are carried in [`PrintOutcome::failure_reason`].
    fn print(&self, request: PrintRequest) -> BoxFuture<'static, PrintOutcome>;
}

/// Read-only view of the printers installed on this machine.
pub trait PrinterDirectory: Send + Sync {
    /// Fresh snapshot of the printer list. Never cached by the caller.
    fn printers(&self) -> Vec<PrinterRecord>;

    /// Status code convention used by [`PrinterRecord::status`].
    fn status_model(&self) -> StatusModel {
        StatusModel::host()
    }

    /// Paper sizes for one printer, or for all printers when `printer` is
    /// `None`.
    fn paper_sizes(&self, printer: Option<&str>) -> Result<Vec<PaperSizeInfo>>;
}
