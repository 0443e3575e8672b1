// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer health check.
//
// A pure predicate over a printer-list snapshot. Printer state is volatile,
// so the snapshot is taken fresh for every job and nothing is remembered
// between calls.
//
// Status tables:
//   Windows: PRINTER_INFO_2 `Status` flags, 0 = ready, anything else = fault.
//   CUPS:    `printer-state` enum, 3 = idle, 4 = processing, 5 = stopped.
//            Only idle counts as healthy.

use tracing::{debug, warn};

use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{PrinterRecord, StatusModel};

/// CUPS `printer-state` value for an idle printer.
pub const CUPS_STATE_IDLE: i32 = 3;

/// Whether a raw status code means the printer is in a fault state.
pub fn is_faulted(model: StatusModel, status: i32) -> bool {
    match model {
        StatusModel::Windows => status != 0,
        StatusModel::Cups => status != CUPS_STATE_IDLE,
    }
}

/// Result of checking one requested printer against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// The requested printer appears in the snapshot.
    pub exists: bool,
    /// The requested printer exists and is in a fault state.
    pub faulted: bool,
    /// Name of the printer flagged as the platform default, if any.
    pub default_printer: Option<String>,
}

/// Inspect `snapshot` for `requested`. Has no side effects.
pub fn check(snapshot: &[PrinterRecord], requested: &str, model: StatusModel) -> HealthReport {
    let mut report = HealthReport {
        exists: false,
        faulted: false,
        default_printer: None,
    };

    for printer in snapshot {
        if !requested.is_empty() && printer.name == requested {
            report.exists = true;
            report.faulted = is_faulted(model, printer.status);
        }
        if printer.is_default {
            report.default_printer = Some(printer.name.clone());
        }
    }

    report
}

/// Pick the device a job should print on.
///
/// - requested printer present and healthy: use it
/// - requested printer present but faulted: `PrinterFault`, no fallback
/// - requested printer absent (or empty): the platform default, or
///   `PrinterNotFound` when there is none
pub fn resolve_printer(
    snapshot: &[PrinterRecord],
    requested: &str,
    model: StatusModel,
) -> Result<String> {
    let report = check(snapshot, requested, model);

    if report.exists {
        if report.faulted {
            warn!(printer = requested, ?model, "requested printer is in a fault state");
            return Err(PrintgateError::PrinterFault(requested.to_owned()));
        }
        return Ok(requested.to_owned());
    }

    match report.default_printer {
        Some(default) => {
            debug!(requested, fallback = %default, "requested printer absent, using default");
            Ok(default)
        }
        None => Err(PrintgateError::PrinterNotFound(if requested.is_empty() {
            "no printer requested and no default printer".into()
        } else {
            format!("{requested} (and no default printer)")
        })),
    }
}
