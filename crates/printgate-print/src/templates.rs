// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print templates keyed by template id, rendered with minijinja.
//
// Undefined variables are errors rather than empty strings: a half-filled
// shipping label is worse than a rejected job.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use printgate_core::error::{PrintgateError, Result};

/// Registered template sources plus the rendering environment.
#[derive(Debug)]
pub struct TemplateRegistry {
    env: Environment<'static>,
    sources: RwLock<HashMap<String, String>>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            env,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace the template for `id`.
    pub fn register(&self, id: impl Into<String>, source: impl Into<String>) {
        let id = id.into();
        debug!(template_id = %id, "template registered");
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, source.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render template `id` against `data`.
    pub fn render(&self, id: &str, data: &Value) -> Result<String> {
        let source = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| PrintgateError::TemplateNotFound(id.to_owned()))?;

        self.env
            .render_str(&source, data)
            .map_err(|e| PrintgateError::TemplateRender(format!("{id}: {e}")))
    }

    /// Register every `*.html` file in `dir`, keyed by file stem.
    ///
    /// A missing directory is not an error. Returns the number loaded.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("template directory absent");
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "skipping template with non-UTF-8 name");
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            self.register(stem, source);
            loaded += 1;
        }

        info!(loaded, "templates loaded");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_registered_template() {
        let registry = TemplateRegistry::new();
        registry.register("label", "<p>{{ name }} x{{ qty }}</p>");
        let html = registry
            .render("label", &json!({"name": "Widget", "qty": 3}))
            .unwrap();
        assert_eq!(html, "<p>Widget x3</p>");
    }

    #[test]
    fn unknown_template_is_not_found() {
        let registry = TemplateRegistry::new();
        let err = registry.render("missing", &json!({})).unwrap_err();
        assert!(matches!(err, PrintgateError::TemplateNotFound(id) if id == "missing"));
    }

    #[test]
    fn undefined_variable_is_render_error() {
        let registry = TemplateRegistry::new();
        registry.register("label", "{{ missing.field }}");
        let err = registry.render("label", &json!({})).unwrap_err();
        assert_eq!(err.kind(), "TemplateRenderError");
    }

    #[test]
    fn load_dir_picks_up_html_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("receipt.html"), "<b>{{ total }}</b>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = TemplateRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);
        assert!(registry.contains("receipt"));
        assert!(!registry.contains("notes"));
    }

    #[test]
    fn missing_dir_loads_nothing() {
        let registry = TemplateRegistry::new();
        assert_eq!(registry.load_dir("/definitely/not/here").unwrap(), 0);
        assert!(registry.is_empty());
    }
}
