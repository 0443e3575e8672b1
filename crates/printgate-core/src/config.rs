// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port for the local event listener.
pub const DEFAULT_PORT: u16 = 17521;

/// Lowest port the listener accepts from configuration.
pub const MIN_PORT: u16 = 10000;

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Printer used when a submission names none. Empty = not configured.
    pub default_printer: String,
    /// Port for the local event listener.
    pub port: u16,
    /// Token local callers must present. Empty disables the check.
    pub token: String,
    /// Connect to the transit relay on startup.
    pub connect_transit: bool,
    /// Relay address (`host:port`).
    pub transit_url: String,
    /// Token presented to the relay on connect.
    pub transit_token: String,
    /// Whether observers should raise user-facing notifications.
    pub allow_notify: bool,
    /// Fragment expiry watchdog tuning.
    pub fragments: FragmentWatchConfig,
    /// Version string of the companion browser plugin, reported as-is.
    pub plugin_version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_printer: String::new(),
            port: DEFAULT_PORT,
            token: String::new(),
            connect_transit: false,
            transit_url: String::new(),
            transit_token: String::new(),
            allow_notify: true,
            fragments: FragmentWatchConfig::default(),
            plugin_version: String::new(),
        }
    }
}

impl AppConfig {
    /// The configured default printer, if any.
    pub fn default_printer(&self) -> Option<&str> {
        let name = self.default_printer.trim();
        (!name.is_empty()).then_some(name)
    }

    /// Listener port, clamped to the allowed range.
    pub fn listen_port(&self) -> u16 {
        if self.port < MIN_PORT {
            DEFAULT_PORT
        } else {
            self.port
        }
    }
}

/// Sweep cadence and staleness threshold for chunked-upload fragments,
/// both in minutes. `expire_minutes` should exceed `check_interval_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentWatchConfig {
    pub check_interval_minutes: u64,
    pub expire_minutes: u64,
}

impl Default for FragmentWatchConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 5,
            expire_minutes: 10,
        }
    }
}

impl FragmentWatchConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.max(1) * 60)
    }

    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.expire_minutes * 60)
    }
}
