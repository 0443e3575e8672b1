// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print submissions (`news`) normalized into job descriptors.

use serde::Deserialize;
use serde_json::Value;

use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{JobDescriptor, JobPayload, RenderOptions};
use printgate_print::TemplateRegistry;

/// The fields of a `news` body the mediator itself looks at. Everything
/// else travels to the executor untouched inside the payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrintSubmission {
    pub printer: Option<String>,
    pub name: Option<String>,
    pub template_id: Option<String>,
    pub template_data: Value,
    pub html: Option<String>,
    pub options: Option<RenderOptions>,
}

impl PrintSubmission {
    pub fn parse(data: &Value) -> Result<Self> {
        if !data.is_object() {
            return Err(PrintgateError::Parameter(
                "print submission must be a JSON object".into(),
            ));
        }
        serde_json::from_value(data.clone())
            .map_err(|e| PrintgateError::Parameter(format!("invalid print submission: {e}")))
    }

    fn requested_printer(&self) -> Option<&str> {
        self.printer
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref().filter(|id| !id.is_empty())
    }

    fn apply(self, mut job: JobDescriptor) -> JobDescriptor {
        job.name = self.name.unwrap_or_default();
        job.template_id = self.template_id.filter(|id| !id.is_empty());
        job.options = self.options.unwrap_or_default();
        job
    }
}

/// Job for a caller on this machine.
///
/// The printer falls back to `default_printer`; with neither the call is a
/// parameter error. A named template is rendered into the payload's `html`.
pub fn local_job(
    data: &Value,
    default_printer: Option<&str>,
    templates: &TemplateRegistry,
) -> Result<JobDescriptor> {
    let submission = PrintSubmission::parse(data)?;

    let printer = submission
        .requested_printer()
        .or(default_printer)
        .map(str::to_owned)
        .ok_or_else(|| {
            PrintgateError::Parameter(
                "no printer selected and no default printer configured".into(),
            )
        })?;

    let html = match submission.template_id() {
        Some(id) => templates.render(id, &submission.template_data)?,
        None => submission.html.clone().unwrap_or_default(),
    };
    if html.is_empty() {
        return Err(PrintgateError::Parameter("missing print content".into()));
    }

    let mut payload = data.clone();
    payload["printer"] = Value::from(printer.as_str());
    payload["html"] = Value::from(html);

    let job = JobDescriptor::local(printer, JobPayload(payload));
    Ok(submission.apply(job))
}

/// Job forwarded by the transit relay on connection `socket_id`.
///
/// An empty printer is left for the health check to resolve against the
/// platform default at dispatch time.
pub fn transit_job(
    data: &Value,
    socket_id: &str,
    reply_id: Option<String>,
    default_printer: Option<&str>,
) -> Result<JobDescriptor> {
    let submission = PrintSubmission::parse(data)?;
    let printer = submission
        .requested_printer()
        .or(default_printer)
        .unwrap_or_default()
        .to_owned();

    let mut job = JobDescriptor::transit(printer, JobPayload(data.clone()), socket_id);
    job.reply_id = reply_id;
    Ok(submission.apply(job))
}
