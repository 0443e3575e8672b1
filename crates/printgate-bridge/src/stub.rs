// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub bridge for builds without a native renderer.
//
// The directory is whatever the caller seeded it with (empty by default) and
// every print resolves to a failure outcome.

use futures::FutureExt;
use futures::future::BoxFuture;

use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{PaperSizeInfo, PrintOutcome, PrintRequest, PrinterRecord};

use crate::traits::*;

/// No-op bridge returned when no native renderer is linked.
#[derive(Debug, Default)]
pub struct StubBridge {
    printers: Vec<PrinterRecord>,
}

impl StubBridge {
    /// Stub that reports a fixed printer list.
    pub fn with_printers(printers: Vec<PrinterRecord>) -> Self {
        Self { printers }
    }
}

impl PlatformBridge for StubBridge {
    fn platform_name(&self) -> &str {
        "Desktop (stub)"
    }
}

impl PrintExecutor for StubBridge {
    fn print(&self, request: PrintRequest) -> BoxFuture<'static, PrintOutcome> {
        tracing::warn!(
            task_id = %request.task_id,
            printer = %request.printer_name,
            "PrintExecutor::print called on stub bridge"
        );
        async { PrintOutcome::failed("no print executor available on this platform") }.boxed()
    }
}

impl PrinterDirectory for StubBridge {
    fn printers(&self) -> Vec<PrinterRecord> {
        self.printers.clone()
    }

    fn paper_sizes(&self, _printer: Option<&str>) -> Result<Vec<PaperSizeInfo>> {
        Err(PrintgateError::PlatformUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printgate_core::types::{JobPayload, RenderOptions, TaskId};

    #[tokio::test]
    async fn stub_print_reports_failure() {
        let bridge = StubBridge::default();
        let outcome = bridge
            .print(PrintRequest {
                task_id: TaskId::generate(),
                printer_name: "P1".into(),
                options: RenderOptions::default(),
                payload: JobPayload::default(),
            })
            .await;
        assert!(!outcome.success);
        assert!(outcome.failure_reason.is_some());
    }

    #[test]
    fn stub_directory_returns_seeded_printers() {
        let bridge = StubBridge::with_printers(vec![PrinterRecord::new("P1", 3, true)]);
        assert_eq!(bridge.printers().len(), 1);
        assert!(matches!(
            bridge.paper_sizes(None),
            Err(PrintgateError::PlatformUnavailable)
        ));
    }
}
