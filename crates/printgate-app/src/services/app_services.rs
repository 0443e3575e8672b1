// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens persistent state, loads configuration and
// templates, and builds the relay-facing services on top of one dispatcher.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use printgate_core::AppConfig;
use printgate_core::error::Result;
use printgate_print::{Dispatcher, FragmentStore, FragmentWatchdog, JobStore, TemplateRegistry};
use printgate_relay::{LocalService, TransitClient};

use super::data_dir;
use super::status::StatusLog;

const CONFIG_FILE: &str = "config.json";
const RECORDS_FILE: &str = "records.db";

/// Everything the daemon runs on. Cheap to clone.
#[derive(Clone)]
pub struct AppServices {
    dispatcher: Dispatcher,
    templates: Arc<TemplateRegistry>,
    fragments: Arc<FragmentWatchdog>,
    status: Arc<StatusLog>,
    data_dir: PathBuf,
    config: Arc<Mutex<AppConfig>>,
}

impl AppServices {
    /// Initialise all services under the platform data directory.
    pub fn init() -> Result<Self> {
        Self::init_in(&data_dir::data_dir())
    }

    /// Initialise all services under `dir`: `config.json`, `records.db` and
    /// `templates/*.html`.
    pub fn init_in(dir: &Path) -> Result<Self> {
        info!(path = %dir.display(), "initialising app services");
        let records = JobStore::open(dir.join(RECORDS_FILE))?;
        let config = load_config(dir).unwrap_or_default();
        Ok(Self::assemble(dir.to_path_buf(), records, config))
    }

    /// In-memory job records and default configuration, for when the data
    /// directory is unusable.
    pub fn fallback() -> Result<Self> {
        let dir = std::env::temp_dir().join("printgate");
        Ok(Self::assemble(dir, JobStore::open_in_memory()?, AppConfig::default()))
    }

    fn assemble(data_dir: PathBuf, records: JobStore, config: AppConfig) -> Self {
        let status = Arc::new(StatusLog::new(config.allow_notify));
        let dispatcher = Dispatcher::new(
            printgate_bridge::platform_bridge(),
            records,
            status.clone(),
        );

        let templates = Arc::new(TemplateRegistry::new());
        match templates.load_dir(data_dir::subdir(&data_dir, "templates")) {
            Ok(loaded) => info!(loaded, "templates ready"),
            Err(e) => warn!("templates not loaded: {e}"),
        }

        let fragments = Arc::new(FragmentWatchdog::from_config(
            FragmentStore::new(),
            &config.fragments,
        ));

        info!(
            platform = dispatcher.bridge().platform_name(),
            default_printer = config.default_printer().unwrap_or("<none>"),
            "app services initialised"
        );

        Self {
            dispatcher,
            templates,
            fragments,
            status,
            data_dir,
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn status(&self) -> &Arc<StatusLog> {
        &self.status
    }

    pub fn fragments(&self) -> &Arc<FragmentWatchdog> {
        &self.fragments
    }

    /// Services for the local listener, bound to the current configuration.
    pub fn local_service(&self) -> LocalService {
        LocalService::new(
            self.dispatcher.clone(),
            Arc::clone(&self.templates),
            Arc::clone(&self.fragments),
            &self.config(),
        )
    }

    /// Relay client for the configured transit URL, if one should run.
    pub fn transit_client(&self) -> Option<TransitClient> {
        let config = self.config();
        if !config.connect_transit {
            return None;
        }
        if config.transit_url.trim().is_empty() {
            warn!("transit connection enabled but no relay URL configured");
            return None;
        }
        Some(TransitClient::new(
            self.dispatcher.clone(),
            self.status.clone(),
            config,
        ))
    }

    // -- Config persistence --------------------------------------------------

    pub fn config(&self) -> AppConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Update and persist the config. Running listeners keep the settings
    /// they were started with.
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        persist_config(&self.data_dir, config)
    }

    /// Write the current config out if no config file exists yet, so there
    /// is one to edit.
    pub fn ensure_config_file(&self) -> Result<()> {
        if self.data_dir.join(CONFIG_FILE).exists() {
            return Ok(());
        }
        persist_config(&self.data_dir, &self.config())
    }
}

fn load_config(data_dir: &Path) -> Option<AppConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), "ignoring unreadable config: {e}");
            None
        }
    }
}

fn persist_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(data_dir.join(CONFIG_FILE), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let services = AppServices::init_in(dir.path()).unwrap();
        assert_eq!(services.config(), AppConfig::default());

        let config = AppConfig {
            default_printer: "Office".into(),
            connect_transit: true,
            transit_url: "relay.local:17521".into(),
            ..AppConfig::default()
        };
        services.save_config(&config).unwrap();

        let reopened = AppServices::init_in(dir.path()).unwrap();
        assert_eq!(reopened.config(), config);
        assert!(reopened.transit_client().is_some());
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        let services = AppServices::init_in(dir.path()).unwrap();
        assert_eq!(services.config(), AppConfig::default());
        assert!(services.transit_client().is_none());
    }

    #[test]
    fn ensure_config_file_keeps_existing_settings() {
        let dir = tempfile::tempdir().unwrap();
        let services = AppServices::init_in(dir.path()).unwrap();
        services.ensure_config_file().unwrap();
        assert!(dir.path().join(CONFIG_FILE).exists());

        let config = AppConfig { port: 18000, ..AppConfig::default() };
        services.save_config(&config).unwrap();
        services.ensure_config_file().unwrap();
        assert_eq!(AppServices::init_in(dir.path()).unwrap().config().port, 18000);
    }

    #[test]
    fn templates_load_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        std::fs::write(dir.path().join("templates/receipt.html"), "<b>{{ total }}</b>").unwrap();

        let services = AppServices::init_in(dir.path()).unwrap();
        assert!(services.templates.contains("receipt"));
    }

    #[test]
    fn fallback_uses_in_memory_records() {
        let services = AppServices::fallback().unwrap();
        assert!(services.dispatcher().recent_records(10).unwrap().is_empty());
        assert!(!services.status().queue_busy());
    }
}
