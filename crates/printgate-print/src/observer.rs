// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Status notifications for whoever presents queue and relay state (a tray
// icon, a window, a log line).

use tokio::sync::watch;

/// Receives queue and relay-link transitions. Implementations must not block.
pub trait StatusObserver: Send + Sync {
    /// Called after every dispatch and completion with the runner's new state.
    fn notify_queue_state(&self, busy: bool);

    /// Called when the transit relay link comes up or goes down.
    fn notify_relay_connected(&self, connected: bool);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StatusObserver for NoopObserver {
    fn notify_queue_state(&self, _busy: bool) {}
    fn notify_relay_connected(&self, _connected: bool) {}
}

/// Publishes the latest state on `watch` channels so any number of tasks can
/// follow it.
#[derive(Debug)]
pub struct WatchObserver {
    queue_busy: watch::Sender<bool>,
    relay_connected: watch::Sender<bool>,
}

impl Default for WatchObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchObserver {
    pub fn new() -> Self {
        let (queue_busy, _) = watch::channel(false);
        let (relay_connected, _) = watch::channel(false);
        Self {
            queue_busy,
            relay_connected,
        }
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<bool> {
        self.queue_busy.subscribe()
    }

    pub fn subscribe_relay(&self) -> watch::Receiver<bool> {
        self.relay_connected.subscribe()
    }
}

impl StatusObserver for WatchObserver {
    fn notify_queue_state(&self, busy: bool) {
        self.queue_busy.send_replace(busy);
    }

    fn notify_relay_connected(&self, connected: bool) {
        self.relay_connected.send_replace(connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_observer_keeps_latest_state() {
        let observer = WatchObserver::new();
        let queue = observer.subscribe_queue();
        let relay = observer.subscribe_relay();

        observer.notify_queue_state(true);
        observer.notify_relay_connected(true);
        observer.notify_relay_connected(false);

        assert!(*queue.borrow());
        assert!(!*relay.borrow());
    }
}
