// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Status observer for the daemon: logs queue and relay transitions and keeps
// the latest state readable.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use printgate_print::{StatusObserver, WatchObserver};

/// Logs every transition and mirrors it onto a [`WatchObserver`].
///
/// With notifications allowed, relay link changes are logged at `info`
/// (the daemon's user-facing channel); otherwise at `debug`.
#[derive(Debug)]
pub struct StatusLog {
    watch: WatchObserver,
    allow_notify: bool,
    connected_since: Mutex<Option<DateTime<Utc>>>,
}

impl StatusLog {
    pub fn new(allow_notify: bool) -> Self {
        Self {
            watch: WatchObserver::new(),
            allow_notify,
            connected_since: Mutex::new(None),
        }
    }

    pub fn queue_busy(&self) -> bool {
        *self.watch.subscribe_queue().borrow()
    }

    pub fn relay_connected(&self) -> bool {
        *self.watch.subscribe_relay().borrow()
    }
}

impl StatusObserver for StatusLog {
    fn notify_queue_state(&self, busy: bool) {
        debug!(busy, "print queue state");
        self.watch.notify_queue_state(busy);
    }

    fn notify_relay_connected(&self, connected: bool) {
        let mut since = self
            .connected_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let message = if connected {
            *since = Some(Utc::now());
            "connected to transit relay".to_owned()
        } else {
            let uptime = since
                .take()
                .map(|start| (Utc::now() - start).num_seconds())
                .unwrap_or_default();
            format!("transit relay link down after {uptime}s")
        };
        drop(since);

        if self.allow_notify {
            info!("{message}");
        } else {
            debug!("{message}");
        }
        self.watch.notify_relay_connected(connected);
    }
}
