// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON form of raw IPP requests forwarded by relay peers.
//
// Relay peers describe a device request as JSON:
//
//   {
//     "operation": "Get-Jobs",
//     "version": "1.1",                      (optional, default 1.1)
//     "id": 7,                               (optional, default 1)
//     "operation-attributes-tag": { "printer-uri": "ipp://...", ... },
//     "job-attributes-tag": { ... },
//     "data": [ ...bytes ] | "text"          (optional document data)
//   }
//
// `json_to_request` maps that onto an `IppRequestResponse`, `send_json_request`
// carries it with `AsyncIppClient`, and `response_to_json` renders the
// printer's answer for the peer.
//
// Value syntaxes are inferred from the attribute name and JSON type since the
// JSON form carries no syntax information.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;

use futures::io::AsyncReadExt;
use ipp::prelude::*;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use printgate_core::error::{PrintgateError, Result};

/// Protocol version used when a request does not name one.
pub const DEFAULT_IPP_VERSION: &str = "1.1";

/// Bound on a full device round trip.
const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(30);

/// Document data after the attributes is cut off past this size.
const MAX_RESPONSE_DATA: u64 = 16 * 1024 * 1024;

/// Operation names accepted in the `operation` field (RFC 8011 §5.2.2).
const OPERATIONS: &[(&str, Operation)] = &[
    ("Print-Job", Operation::PrintJob),
    ("Print-URI", Operation::PrintUri),
    ("Validate-Job", Operation::ValidateJob),
    ("Create-Job", Operation::CreateJob),
    ("Send-Document", Operation::SendDocument),
    ("Send-URI", Operation::SendUri),
    ("Cancel-Job", Operation::CancelJob),
    ("Get-Job-Attributes", Operation::GetJobAttributes),
    ("Get-Jobs", Operation::GetJobs),
    ("Get-Printer-Attributes", Operation::GetPrinterAttributes),
    ("Hold-Job", Operation::HoldJob),
    ("Release-Job", Operation::ReleaseJob),
    ("Restart-Job", Operation::RestartJob),
    ("Pause-Printer", Operation::PausePrinter),
    ("Resume-Printer", Operation::ResumePrinter),
    ("Purge-Jobs", Operation::PurgeJobs),
];

/// Group names in the JSON form.
const GROUPS: &[(&str, DelimiterTag)] = &[
    ("operation-attributes-tag", DelimiterTag::OperationAttributes),
    ("job-attributes-tag", DelimiterTag::JobAttributes),
    ("printer-attributes-tag", DelimiterTag::PrinterAttributes),
    ("unsupported-attributes-tag", DelimiterTag::UnsupportedAttributes),
];

/// Integer-valued attributes whose syntax is `enum` rather than `integer`.
const ENUM_ATTRIBUTES: &[&str] = &[
    "job-state",
    "printer-state",
    "operations-supported",
    "orientation-requested",
    "orientation-requested-default",
    "print-quality",
    "print-quality-default",
    "finishings",
    "finishings-default",
];

pub fn operation_from_name(name: &str) -> Option<Operation> {
    OPERATIONS
        .iter()
        .find(|(op, _)| op.eq_ignore_ascii_case(name))
        .map(|(_, op)| *op)
}

fn group_name(tag: DelimiterTag) -> String {
    GROUPS
        .iter()
        .find(|(_, t)| *t == tag)
        .map(|(name, _)| (*name).to_owned())
        .unwrap_or_else(|| format!("group-0x{:02x}-tag", tag as u8))
}

/// Parse `major.minor`; a bare major means minor 0.
pub fn parse_version(text: &str) -> Result<IppVersion> {
    let text = text.trim();
    let (major, minor) = text.split_once('.').unwrap_or((text, "0"));
    match (major.trim().parse::<u8>(), minor.trim().parse::<u8>()) {
        (Ok(major), Ok(minor)) => Ok(IppVersion((u16::from(major) << 8) | u16::from(minor))),
        _ => Err(PrintgateError::Protocol(format!("invalid IPP version {text:?}"))),
    }
}

pub fn version_string(version: IppVersion) -> String {
    format!("{}.{}", version.0 >> 8, version.0 & 0xff)
}

fn version_from_json(value: Option<&Value>) -> Result<IppVersion> {
    match value {
        None | Some(Value::Null) => parse_version(DEFAULT_IPP_VERSION),
        Some(Value::String(s)) => parse_version(s),
        Some(Value::Number(n)) => parse_version(&n.to_string()),
        Some(other) => Err(PrintgateError::Protocol(format!("invalid IPP version {other}"))),
    }
}

/// Check that `url` is an ipp/ipps/http/https device address.
pub fn device_uri(url: &str) -> Result<Uri> {
    let uri: Uri = url
        .parse()
        .map_err(|e| PrintgateError::Protocol(format!("invalid URI '{url}': {e}")))?;
    match uri.scheme_str() {
        Some("ipp" | "ipps" | "http" | "https") => Ok(uri),
        _ => Err(PrintgateError::Protocol(format!(
            "URI '{url}' is not an ipp/http printer address"
        ))),
    }
}

// ---------------------------------------------------------------------------
// JSON -> IPP
// ---------------------------------------------------------------------------

/// String value of attribute `syntax`, typed by its name.
fn string_value(syntax: &str, s: &str) -> IppValue {
    let s = s.to_owned();
    match syntax {
        "attributes-charset" | "charset-configured" | "charset-supported" => IppValue::Charset(s),
        "attributes-natural-language"
        | "natural-language-configured"
        | "generated-natural-language-supported" => IppValue::NaturalLanguage(s),
        "document-format" | "document-format-default" | "document-format-supported" => {
            IppValue::MimeMediaType(s)
        }
        n if n.ends_with("-uri") || n.ends_with("-uri-supported") => IppValue::Uri(s),
        n if n.ends_with("-name") => IppValue::NameWithoutLanguage(s),
        n if n.ends_with("-message") || n.ends_with("-text") || n.ends_with("-info") => {
            IppValue::TextWithoutLanguage(s)
        }
        _ => IppValue::Keyword(s),
    }
}

/// Map a JSON value of attribute `syntax` onto an IPP value. Arrays become
/// 1setOf values and objects become collections.
pub fn json_to_value(syntax: &str, value: &Value) -> Result<IppValue> {
    match value {
        Value::String(s) => Ok(string_value(syntax, s)),
        Value::Bool(b) => Ok(IppValue::Boolean(*b)),
        Value::Number(n) => {
            let int = n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| {
                    PrintgateError::Protocol(format!("{syntax}: {n} is not a 32-bit integer"))
                })?;
            if ENUM_ATTRIBUTES.contains(&syntax) {
                Ok(IppValue::Enum(int))
            } else {
                Ok(IppValue::Integer(int))
            }
        }
        Value::Array(values) if values.is_empty() => Ok(IppValue::NoValue),
        Value::Array(values) => values
            .iter()
            .map(|item| {
                if item.is_array() {
                    Err(PrintgateError::Protocol(format!(
                        "{syntax}: nested arrays are not supported"
                    )))
                } else {
                    json_to_value(syntax, item)
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(IppValue::Array),
        Value::Null => Ok(IppValue::NoValue),
        Value::Object(members) => members
            .iter()
            .map(|(name, member)| Ok((name.clone(), json_to_value(name, member)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(IppValue::Collection),
    }
}

fn document_data(value: Option<&Value>) -> Result<Vec<u8>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.clone().into_bytes()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| PrintgateError::Protocol("`data` must be an array of bytes".into())),
        Some(other) => Err(PrintgateError::Protocol(format!(
            "unsupported `data` value {other}"
        ))),
    }
}

/// Build a request from the JSON request form.
///
/// `attributes-charset` and `attributes-natural-language` default to
/// utf-8 and en. `printer-uri` defaults to `target` when given.
pub fn json_to_request(request: &Value, target: Option<&Uri>) -> Result<IppRequestResponse> {
    let object = request
        .as_object()
        .ok_or_else(|| PrintgateError::Protocol("IPP request must be a JSON object".into()))?;

    let op_name = object
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| PrintgateError::Protocol("IPP request is missing `operation`".into()))?;
    let operation = operation_from_name(op_name)
        .ok_or_else(|| PrintgateError::Protocol(format!("unknown IPP operation {op_name:?}")))?;
    let version = version_from_json(object.get("version"))?;
    let request_id = match object.get("id") {
        None => 1,
        Some(id) => id
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| PrintgateError::Protocol(format!("invalid request id {id}")))?,
    };

    let mut ipp_request = IppRequestResponse::new(version, operation, target.cloned());
    ipp_request.header_mut().request_id = request_id;

    for (group, tag) in GROUPS {
        let attrs = match object.get(*group) {
            None | Some(Value::Null) => continue,
            Some(Value::Object(attrs)) => attrs,
            Some(other) => {
                return Err(PrintgateError::Protocol(format!(
                    "{group} must be an object, got {other}"
                )));
            }
        };
        for (name, value) in attrs {
            let value = json_to_value(name, value)?;
            ipp_request
                .attributes_mut()
                .add(*tag, IppAttribute::new(name, value));
        }
    }

    let data = document_data(object.get("data"))?;
    if !data.is_empty() {
        *ipp_request.payload_mut() = IppPayload::new(Cursor::new(data));
    }
    Ok(ipp_request)
}

// ---------------------------------------------------------------------------
// IPP -> JSON
// ---------------------------------------------------------------------------

pub fn value_to_json(value: &IppValue) -> Value {
    match value {
        IppValue::Integer(i) | IppValue::Enum(i) => json!(i),
        IppValue::Boolean(b) => json!(b),
        IppValue::NoValue => Value::Null,
        IppValue::Array(items) => Value::Array(items.iter().map(value_to_json).collect()),
        IppValue::Collection(members) => Value::Object(
            members
                .iter()
                .map(|(name, member)| (name.clone(), value_to_json(member)))
                .collect(),
        ),
        IppValue::RangeOfInteger { min, max } => json!({ "min": min, "max": max }),
        IppValue::Resolution {
            cross_feed,
            feed,
            units,
        } => json!({ "crossFeed": cross_feed, "feed": feed, "units": units }),
        IppValue::Other { tag, data } => json!({ "tag": tag, "data": hex::encode(data) }),
        other => Value::String(other.to_string()),
    }
}

/// Attribute groups in wire order as `[{tag, attributes: {name: value}}]`.
pub fn attributes_to_json(attributes: &IppAttributes) -> Vec<Value> {
    attributes
        .groups()
        .iter()
        .map(|group| {
            let attrs: Map<String, Value> = group
                .attributes()
                .iter()
                .map(|(name, attr)| (name.clone(), value_to_json(attr.value())))
                .collect();
            json!({ "tag": group_name(group.tag()), "attributes": attrs })
        })
        .collect()
}

/// Summarize a response as JSON:
/// `{version, statusCode, requestId, attributes: [{tag, attributes}], data?}`.
pub fn response_to_json(response: &IppRequestResponse, data: &[u8]) -> Value {
    let header = response.header();
    let mut out = json!({
        "version": version_string(header.version),
        "statusCode": header.operation_or_status,
        "requestId": header.request_id,
        "attributes": attributes_to_json(response.attributes()),
    });
    if !data.is_empty() {
        out["data"] = Value::from(data.to_vec());
    }
    out
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub fn async_client(uri: Uri) -> AsyncIppClient {
    AsyncIppClient::builder(uri)
        .request_timeout(ROUND_TRIP_TIMEOUT)
        .build()
}

/// Send the JSON request form to the device at `url` and return the JSON
/// summary of its answer. Transport failures are protocol errors; an IPP
/// error status is still a response.
#[instrument(skip(request))]
pub async fn send_json_request(url: &str, request: &Value) -> Result<Value> {
    let uri = device_uri(url)?;
    let ipp_request = json_to_request(request, Some(&uri))?;

    debug!(
        operation = ipp_request.header().operation_or_status,
        "sending raw IPP request"
    );
    let response = async_client(uri)
        .send(ipp_request)
        .await
        .map_err(|e| PrintgateError::Protocol(format!("IPP request to {url} failed: {e}")))?;

    let status = response.header().status_code();
    info!(status = ?status, "device answered");
    let mut summary = response_to_json(&response, &[]);

    let mut data = Vec::new();
    if let Err(e) = response
        .into_payload()
        .take(MAX_RESPONSE_DATA)
        .read_to_end(&mut data)
        .await
    {
        warn!("response document data unreadable: {e}");
    }
    if !data.is_empty() {
        summary["data"] = Value::from(data);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_attr<'a>(request: &'a IppRequestResponse, name: &str) -> Option<&'a IppValue> {
        request
            .attributes()
            .groups_of(DelimiterTag::OperationAttributes)
            .find_map(|g| g.attributes().get(name))
            .map(|a| a.value())
    }

    #[test]
    fn operation_names_are_case_insensitive() {
        assert_eq!(
            operation_from_name("Get-Printer-Attributes"),
            Some(Operation::GetPrinterAttributes)
        );
        assert_eq!(operation_from_name("print-job"), Some(Operation::PrintJob));
        assert_eq!(operation_from_name("Teleport-Job"), None);
    }

    #[test]
    fn versions_parse_and_default() {
        assert_eq!(parse_version("2.0").unwrap(), IppVersion::v2_0());
        assert_eq!(parse_version("1").unwrap(), IppVersion::v1_0());
        assert!(parse_version("x.y").is_err());
        assert_eq!(version_string(IppVersion::v2_2()), "2.2");

        let request = json_to_request(&json!({"operation": "Get-Jobs"}), None).unwrap();
        assert_eq!(request.header().version, IppVersion::v1_1());
        assert_eq!(version_string(request.header().version), DEFAULT_IPP_VERSION);
        assert_eq!(request.header().request_id, 1);
    }

    #[test]
    fn json_request_maps_inferred_syntaxes() {
        let request = json_to_request(
            &json!({
                "operation": "Get-Jobs",
                "version": "2.0",
                "id": 9,
                "operation-attributes-tag": {
                    "printer-uri": "ipp://printer.local/ipp/print",
                    "requesting-user-name": "hiPrint",
                    "which-jobs": "completed",
                    "limit": 5,
                    "my-jobs": true,
                    "requested-attributes": ["job-id", "job-state"]
                }
            }),
            None,
        )
        .unwrap();

        assert_eq!(request.header().version, IppVersion::v2_0());
        assert_eq!(request.header().operation_or_status, Operation::GetJobs as u16);
        assert_eq!(request.header().request_id, 9);
        assert_eq!(
            op_attr(&request, "attributes-charset"),
            Some(&IppValue::Charset("utf-8".into()))
        );
        assert!(matches!(op_attr(&request, "printer-uri"), Some(IppValue::Uri(_))));
        assert!(matches!(
            op_attr(&request, "requesting-user-name"),
            Some(IppValue::NameWithoutLanguage(_))
        ));
        assert!(matches!(op_attr(&request, "which-jobs"), Some(IppValue::Keyword(_))));
        assert_eq!(op_attr(&request, "limit"), Some(&IppValue::Integer(5)));
        assert_eq!(op_attr(&request, "my-jobs"), Some(&IppValue::Boolean(true)));
        assert_eq!(
            op_attr(&request, "requested-attributes"),
            Some(&IppValue::Array(vec![
                IppValue::Keyword("job-id".into()),
                IppValue::Keyword("job-state".into()),
            ]))
        );
    }

    #[test]
    fn target_fills_missing_printer_uri() {
        let target = device_uri("ipp://10.0.0.5/ipp/print").unwrap();
        let request = json_to_request(&json!({"operation": "Get-Printer-Attributes"}), Some(&target))
            .unwrap();
        assert!(matches!(op_attr(&request, "printer-uri"), Some(IppValue::Uri(_))));
    }

    #[test]
    fn enums_and_collections_are_typed() {
        assert_eq!(json_to_value("printer-state", &json!(3)).unwrap(), IppValue::Enum(3));
        assert_eq!(json_to_value("copies", &json!(2)).unwrap(), IppValue::Integer(2));
        assert_eq!(json_to_value("sides", &json!([])).unwrap(), IppValue::NoValue);

        let media = json_to_value("media-col", &json!({"media-type": "stationery"})).unwrap();
        let IppValue::Collection(members) = media else {
            panic!("expected a collection");
        };
        assert_eq!(members["media-type"], IppValue::Keyword("stationery".into()));
    }

    #[test]
    fn json_request_carries_document_data() {
        let request = json_to_request(
            &json!({
                "operation": "Print-Job",
                "operation-attributes-tag": { "document-format": "text/plain" },
                "data": [104, 105]
            }),
            None,
        )
        .unwrap();
        assert!(matches!(
            op_attr(&request, "document-format"),
            Some(IppValue::MimeMediaType(_))
        ));

        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut request.into_payload(), &mut data).unwrap();
        assert_eq!(data, b"hi");
    }

    #[test]
    fn malformed_json_requests_are_protocol_errors() {
        for bad in [
            json!("Get-Jobs"),
            json!({}),
            json!({"operation": "Nope"}),
            json!({"operation": "Get-Jobs", "version": "x"}),
            json!({"operation": "Get-Jobs", "id": -1}),
            json!({"operation": "Get-Jobs", "job-attributes-tag": "copies"}),
            json!({"operation": "Get-Jobs", "operation-attributes-tag": {"a": [[1]]}}),
            json!({"operation": "Print-Job", "data": [300]}),
        ] {
            let err = json_to_request(&bad, None).err().map(|e| e.kind());
            assert_eq!(err, Some("ProtocolError"), "{bad}");
        }
    }

    #[test]
    fn response_summary_renders_groups() {
        let mut response =
            IppRequestResponse::new_response(IppVersion::v1_1(), StatusCode::SuccessfulOk, 3);
        let attrs = response.attributes_mut();
        attrs.add(DelimiterTag::JobAttributes, IppAttribute::new("job-id", IppValue::Integer(12)));
        attrs.add(DelimiterTag::JobAttributes, IppAttribute::new("job-state", IppValue::Enum(9)));
        attrs.add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new(
                "sides-supported",
                IppValue::Array(vec![
                    IppValue::Keyword("one-sided".into()),
                    IppValue::Keyword("two-sided-long-edge".into()),
                ]),
            ),
        );
        attrs.add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new("color-supported", IppValue::Boolean(true)),
        );

        let summary = response_to_json(&response, b"ok");
        assert_eq!(summary["version"], "1.1");
        assert_eq!(summary["statusCode"], 0);
        assert_eq!(summary["requestId"], 3);
        assert_eq!(summary["data"], json!([111, 107]));

        let groups = summary["attributes"].as_array().unwrap();
        let group = |tag: &str| groups.iter().find(|g| g["tag"] == tag).unwrap();
        assert_eq!(group("operation-attributes-tag")["attributes"]["attributes-charset"], "utf-8");
        assert_eq!(group("job-attributes-tag")["attributes"]["job-id"], 12);
        assert_eq!(group("job-attributes-tag")["attributes"]["job-state"], 9);
        let printer = &group("printer-attributes-tag")["attributes"];
        assert_eq!(printer["sides-supported"], json!(["one-sided", "two-sided-long-edge"]));
        assert_eq!(printer["color-supported"], true);
    }

    #[test]
    fn device_uri_accepts_secure_schemes() {
        assert!(device_uri("ipps://secure.local/ipp/print").is_ok());
        assert!(device_uri("https://secure.local:443/ipp/print").is_ok());
        assert_eq!(device_uri("ftp://x/").unwrap_err().kind(), "ProtocolError");
    }

    #[tokio::test]
    async fn connection_refused_is_protocol_error() {
        let err = send_json_request("ipp://127.0.0.1:1/", &json!({"operation": "Get-Jobs"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ProtocolError");
    }
}
