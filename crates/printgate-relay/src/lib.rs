// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printgate Relay: the event-tagged channel in both of its roles. The local
// listener serves callers on this machine; the transit client keeps one
// outbound connection to a relay that forwards jobs and device calls.

pub mod events;
pub mod host;
pub mod local;
pub mod submission;
pub mod transit;
pub mod transport;

pub use events::{DeviceCallback, InboundFrame, OutboundEvent, RelaySink};
pub use host::HostIdentity;
pub use local::{ApiResponse, LocalListener, LocalService};
pub use transit::{ReconnectPolicy, TransitClient, TransitSession};
pub use transport::{FrameReader, FrameWriter, split_stream};
