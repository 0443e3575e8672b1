// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Async IPP client for relay-forwarded device actions.
//
// A relay peer names an action and supplies a message shaped like the JSON
// request form (see `ipp_codec`); the client maps it onto the `ipp` crate's
// operation builders:
//   - Get-Printer-Attributes  (RFC 8011 §4.2.5)
//   - Print-Job               (RFC 8011 §4.2.1)
//   - Get-Jobs                (RFC 8011 §4.2.6)
//   - Cancel-Job              (RFC 8011 §4.3.3)
//
// Transport failures are errors. A printer that answers with an IPP error
// status is still a response; the peer sees the status in the summary.

use std::io::Cursor;

use ipp::operation::IppOperation;
use ipp::prelude::*;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use printgate_core::error::{PrintgateError, Result};

use crate::ipp_codec::{async_client, attributes_to_json, device_uri, json_to_value};

/// `requesting-user-name` used when the message does not carry one.
pub const DEFAULT_REQUESTING_USER: &str = "hiPrint";

/// Device actions a relay peer may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IppAction {
    GetPrinterAttributes,
    PrintJob,
    GetJobs,
    CancelJob,
}

impl IppAction {
    pub fn parse(action: &str) -> Result<Self> {
        match action {
            "Get-Printer-Attributes" => Ok(Self::GetPrinterAttributes),
            "Print-Job" => Ok(Self::PrintJob),
            "Get-Jobs" => Ok(Self::GetJobs),
            "Cancel-Job" => Ok(Self::CancelJob),
            other => Err(PrintgateError::Protocol(format!(
                "unsupported IPP action {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetPrinterAttributes => "Get-Printer-Attributes",
            Self::PrintJob => "Print-Job",
            Self::GetJobs => "Get-Jobs",
            Self::CancelJob => "Cancel-Job",
        }
    }
}

/// Async IPP client bound to one printer URI.
#[derive(Debug, Clone)]
pub struct IppClient {
    uri: Uri,
}

impl IppClient {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(Self {
            uri: device_uri(uri)?,
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Run `action` at protocol `version` with `message` (operation/job
    /// attribute groups) and optional document `data`. Returns the response
    /// summary `{statusCode, success, attributes: [{tag, attributes}], jobId?}`.
    #[instrument(skip(self, message, data), fields(uri = %self.uri, action = action.as_str()))]
    pub async fn execute(
        &self,
        action: IppAction,
        version: IppVersion,
        message: &Value,
        data: Vec<u8>,
    ) -> Result<Value> {
        let mut request = self.build_operation(action, message, data)?;
        request.header_mut().version = version;

        debug!("sending IPP operation");
        let response = async_client(self.uri.clone())
            .send(request)
            .await
            .map_err(|e| PrintgateError::Protocol(format!("{}: {e}", action.as_str())))?;

        let code = response.header().status_code();
        let success = code.is_success();
        if success {
            info!(status = ?code, "IPP operation succeeded");
        } else {
            warn!(status = ?code, "IPP operation answered with error status");
        }

        let mut summary = json!({
            "statusCode": format!("{code:?}"),
            "success": success,
            "attributes": attributes_to_json(response.attributes()),
        });
        if let Some(job_id) = extract_job_id(response.attributes()) {
            summary["jobId"] = json!(job_id);
        }
        Ok(summary)
    }

    fn build_operation(
        &self,
        action: IppAction,
        message: &Value,
        data: Vec<u8>,
    ) -> Result<IppRequestResponse> {
        let op_attrs = message.get("operation-attributes-tag");
        let op_str = |name: &str| op_attrs.and_then(|a| a.get(name)).and_then(Value::as_str);

        let request = match action {
            IppAction::GetPrinterAttributes => {
                IppOperationBuilder::get_printer_attributes(self.uri.clone())
                    .build()
                    .into_ipp_request()
            }
            IppAction::GetJobs => IppOperationBuilder::get_jobs(self.uri.clone())
                .build()
                .into_ipp_request(),
            IppAction::CancelJob => {
                let job_id = op_attrs
                    .and_then(|a| a.get("job-id"))
                    .and_then(Value::as_i64)
                    .and_then(|id| i32::try_from(id).ok())
                    .ok_or_else(|| {
                        PrintgateError::Parameter("Cancel-Job requires an integer job-id".into())
                    })?;
                IppOperationBuilder::cancel_job(self.uri.clone(), job_id)
                    .build()
                    .into_ipp_request()
            }
            IppAction::PrintJob => {
                let payload = IppPayload::new(Cursor::new(data));
                let user = op_str("requesting-user-name").unwrap_or(DEFAULT_REQUESTING_USER);
                let mut builder = IppOperationBuilder::print_job(self.uri.clone(), payload)
                    .user_name(user)
                    .job_title(op_str("job-name").unwrap_or("printgate job"));
                if let Some(format) = op_str("document-format") {
                    builder = builder.document_format(format);
                }
                if let Some(Value::Object(job_attrs)) = message.get("job-attributes-tag") {
                    for (name, value) in job_attrs {
                        match json_to_value(name, value) {
                            Ok(value) => builder = builder.attribute(IppAttribute::new(name, value)),
                            Err(e) => warn!(attribute = %name, "job attribute skipped: {e}"),
                        }
                    }
                }
                builder.build().into_ipp_request()
            }
        };
        Ok(request)
    }
}

fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    attrs
        .groups_of(DelimiterTag::JobAttributes)
        .find_map(|group| match group.attributes().get("job-id").map(|a| a.value()) {
            Some(IppValue::Integer(id)) => Some(*id),
            _ => None,
        })
}
