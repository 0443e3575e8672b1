// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printgate: native print capability seams.
//
// The orchestration core never paints a document or talks to a driver
// itself. It dispatches into a `PrintExecutor` and reads printer state from a
// `PrinterDirectory`; the platform supplies both.

pub mod traits;

pub mod stub;

pub use traits::{PlatformBridge, PrintExecutor, PrinterDirectory};

/// Retrieves the bridge implementation for the running platform.
///
/// Desktop renderers register themselves through the application layer; when
/// none is linked in, the stub keeps the daemon functional (relay, IPP
/// passthrough, status queries) while reporting every local print as failed.
pub fn platform_bridge() -> std::sync::Arc<dyn traits::PlatformBridge> {
    std::sync::Arc::new(stub::StubBridge::default())
}
