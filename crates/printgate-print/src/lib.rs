// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printgate Print: the orchestration core. Serialized job runner, task
// correlation, printer health policy, fragment expiry, job records,
// templates, and the IPP client/codec used for relay-forwarded device calls.

pub mod correlation;
pub mod dispatcher;
pub mod fragments;
pub mod health;
pub mod ipp_client;
pub mod ipp_codec;
pub mod observer;
pub mod records;
pub mod runner;
pub mod templates;

pub use correlation::{TaskCompletion, TaskMap};
pub use dispatcher::{Dispatcher, JobResult, ResultRoute};
pub use fragments::{FragmentStore, FragmentWatchdog};
pub use ipp_client::{IppAction, IppClient};
pub use observer::{NoopObserver, StatusObserver, WatchObserver};
pub use records::JobStore;
pub use runner::{JobDone, JobRunner};
pub use templates::TemplateRegistry;
