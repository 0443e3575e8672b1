// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transit relay client: the client role of the relay channel.
//
// One outbound connection to a relay that forwards jobs and device calls
// from elsewhere. On connect the client announces itself (optional auth
// token, printer list, host identity), then reacts to:
//
//   - getClientInfo       re-emit the host identity
//   - refreshPrinterList  re-emit a fresh printer snapshot
//   - ippPrint            run an IPP action against a device URL
//   - ippRequest          post a structured IPP request to a device URL
//   - news                queue a print job; its result comes back as
//                         `success` / `error` on this connection
//   - disconnect          close the session
//
// Device calls run in their own tasks and report through a callback event
// that echoes the caller's `replyId`, error or not. A failed call never
// tears down the connection.
//
// A dropped connection is retried with exponential backoff until shutdown.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use printgate_core::config::AppConfig;
use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::TaskId;
use printgate_print::ipp_client::DEFAULT_REQUESTING_USER;
use printgate_print::ipp_codec::{DEFAULT_IPP_VERSION, parse_version, send_json_request};
use printgate_print::{Dispatcher, IppAction, IppClient, StatusObserver};

use crate::events::{
    DeviceCallback, DeviceSession, InboundFrame, JobNotice, OutboundEvent, PrinterConnected,
    RelaySink,
};
use crate::host::HostIdentity;
use crate::submission;
use crate::transport::{FrameWriter, shared_route, split_stream};

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl ReconnectPolicy {
    /// delay = min(base * 2^attempt + jitter, max_delay), jitter in [0, base).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
        let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
        Duration::from_millis(total_ms.min(self.max_delay.as_millis() as u64))
    }
}

/// Spread retries across [0, base) without a random source.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Event handling for one live relay connection.
#[derive(Debug)]
pub struct TransitSession {
    dispatcher: Dispatcher,
    writer: FrameWriter,
    socket_id: String,
    listen_port: u16,
    plugin_version: String,
    default_printer: Option<String>,
}

impl TransitSession {
    pub fn new(
        dispatcher: Dispatcher,
        writer: FrameWriter,
        socket_id: impl Into<String>,
        config: &AppConfig,
    ) -> Self {
        Self {
            dispatcher,
            writer,
            socket_id: socket_id.into(),
            listen_port: config.listen_port(),
            plugin_version: config.plugin_version.clone(),
            default_printer: config.default_printer().map(str::to_owned),
        }
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    /// Greeting sent right after connecting.
    pub fn announce(&self, token: &str) -> Result<()> {
        if !token.is_empty() {
            self.writer.emit(OutboundEvent::Auth {
                token: token.to_owned(),
            })?;
        }
        self.emit_printer_list()?;
        self.emit_client_info()
    }

    pub fn emit_printer_list(&self) -> Result<()> {
        let printers = self.dispatcher.bridge().printers();
        self.writer.emit(OutboundEvent::PrinterList(printers))
    }

    pub fn emit_client_info(&self) -> Result<()> {
        let identity = HostIdentity::collect(self.listen_port, &self.plugin_version);
        self.writer.emit(OutboundEvent::ClientInfo(identity))
    }

    /// React to one inbound frame. `Break` ends the session.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle(&self, mut frame: InboundFrame) -> ControlFlow<()> {
        let reply_id = frame.reply_id();
        let data = std::mem::take(&mut frame.data);
        info!(socket_id = %self.socket_id, event = %frame.event, reply_id = ?reply_id, "transit event");

        let emitted = match frame.event.as_str() {
            "getClientInfo" => self.emit_client_info(),
            "refreshPrinterList" => self.emit_printer_list(),
            "ippPrint" => {
                tokio::spawn(ipp_print(self.writer.clone(), data, reply_id));
                Ok(())
            }
            "ippRequest" => {
                tokio::spawn(ipp_request(self.writer.clone(), data, reply_id));
                Ok(())
            }
            "news" => self.news(&data, reply_id),
            "disconnect" => return ControlFlow::Break(()),
            other => {
                debug!(event = other, "ignoring unknown transit event");
                Ok(())
            }
        };
        if let Err(e) = emitted {
            warn!(socket_id = %self.socket_id, event = %frame.event, "reply not sent: {e}");
        }
        ControlFlow::Continue(())
    }

    /// Queue a relay-submitted job. A body that cannot become a job is
    /// answered with an `error` result right away.
    fn news(&self, data: &Value, reply_id: Option<String>) -> Result<()> {
        if data.is_null() {
            debug!(socket_id = %self.socket_id, "empty news frame ignored");
            return Ok(());
        }

        match submission::transit_job(
            data,
            &self.socket_id,
            reply_id.clone(),
            self.default_printer.as_deref(),
        ) {
            Ok(job) => {
                let task_id = self.dispatcher.submit(job, Some(shared_route(&self.writer)));
                info!(task_id = %task_id, socket_id = %self.socket_id, "transit job queued");
                Ok(())
            }
            Err(e) => {
                warn!(socket_id = %self.socket_id, kind = e.kind(), "transit job rejected: {e}");
                self.writer.emit(OutboundEvent::Error(JobNotice {
                    task_id: TaskId::generate(),
                    socket_id: Some(self.socket_id.clone()),
                    reply_id,
                    template_id: None,
                    msg: e.to_string(),
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Device calls
// ---------------------------------------------------------------------------

#[instrument(skip(writer, request))]
async fn ipp_print(writer: FrameWriter, request: Value, reply_id: Option<String>) {
    let callback = match run_ipp_print(&writer, &request, reply_id.clone()).await {
        Ok(response) => DeviceCallback::answered(reply_id, response),
        Err(e) => {
            warn!(kind = e.kind(), "ippPrint failed: {e}");
            DeviceCallback::failed(reply_id, &e)
        }
    };
    if let Err(e) = writer.emit(OutboundEvent::IppPrinterCallback(callback)) {
        warn!("ippPrint callback not sent: {e}");
    }
}

async fn run_ipp_print(
    writer: &FrameWriter,
    request: &Value,
    reply_id: Option<String>,
) -> Result<Value> {
    let url = required_str(request, "url")?;
    let version = session_version(request.get("opt"))?;
    let action = IppAction::parse(required_str(request, "action")?)?;
    let ipp_version = parse_version(&version)
        .map_err(|_| PrintgateError::Parameter(format!("invalid IPP version {version:?}")))?;
    let client = IppClient::new(url)?;

    writer.emit(OutboundEvent::IppPrinterConnected(PrinterConnected {
        reply_id,
        printer: DeviceSession {
            url: url.to_owned(),
            version,
        },
    }))?;

    let message = with_default_user(request.get("message"))?;
    let encoding = message.get("encoding").and_then(Value::as_str);
    let data = normalize_body(message.get("data"), encoding)?;
    client.execute(action, ipp_version, &message, data).await
}

#[instrument(skip(writer, request))]
async fn ipp_request(writer: FrameWriter, request: Value, reply_id: Option<String>) {
    let callback = match run_ipp_request(&request).await {
        Ok(response) => DeviceCallback::answered(reply_id, response),
        Err(e) => {
            warn!(kind = e.kind(), "ippRequest failed: {e}");
            DeviceCallback::failed(reply_id, &e)
        }
    };
    if let Err(e) = writer.emit(OutboundEvent::IppRequestCallback(callback)) {
        warn!("ippRequest callback not sent: {e}");
    }
}

async fn run_ipp_request(request: &Value) -> Result<Value> {
    let url = required_str(request, "url")?;
    let data = request
        .get("data")
        .filter(|d| !d.is_null())
        .ok_or_else(|| PrintgateError::Parameter("ippRequest requires `data`".into()))?;

    send_json_request(url, data).await
}

fn required_str<'a>(request: &'a Value, field: &str) -> Result<&'a str> {
    request
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PrintgateError::Parameter(format!("missing `{field}`")))
}

/// IPP version from the session options (`opt`), which must be an object
/// when present.
fn session_version(opt: Option<&Value>) -> Result<String> {
    match opt {
        None | Some(Value::Null) => Ok(DEFAULT_IPP_VERSION.into()),
        Some(Value::Object(opt)) => match opt.get("version") {
            None | Some(Value::Null) => Ok(DEFAULT_IPP_VERSION.into()),
            Some(Value::String(v)) => Ok(v.clone()),
            Some(other) => Err(PrintgateError::Parameter(format!(
                "invalid IPP version {other}"
            ))),
        },
        Some(other) => Err(PrintgateError::Parameter(format!(
            "ippPrint options must be an object, got {other}"
        ))),
    }
}

/// The message with `requesting-user-name` filled in when absent.
fn with_default_user(message: Option<&Value>) -> Result<Value> {
    let mut message = match message {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(other) => {
            return Err(PrintgateError::Parameter(format!(
                "ippPrint message must be an object, got {other}"
            )));
        }
    };

    let op_attrs = message
        .entry("operation-attributes-tag")
        .or_insert_with(|| json!({}));
    let Some(op_attrs) = op_attrs.as_object_mut() else {
        return Err(PrintgateError::Parameter(
            "operation-attributes-tag must be an object".into(),
        ));
    };
    op_attrs
        .entry("requesting-user-name")
        .or_insert_with(|| json!(DEFAULT_REQUESTING_USER));
    Ok(Value::Object(message))
}

/// Turn a message body into document bytes.
///
/// Accepted forms: a byte array, a serialized buffer `{"type": "Buffer",
/// "data": [..]}`, or text encoded with `encoding` (`utf8` by default,
/// `latin1`/`binary`, `ascii`, `hex`).
fn normalize_body(data: Option<&Value>, encoding: Option<&str>) -> Result<Vec<u8>> {
    match data {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => byte_array(items),
        Some(Value::Object(obj)) => match obj.get("data") {
            Some(Value::Array(items)) => byte_array(items),
            _ => Err(PrintgateError::Parameter(
                "object body must carry a `data` byte array".into(),
            )),
        },
        Some(Value::String(text)) => encode_text(text, encoding.unwrap_or("utf8")),
        Some(other) => Err(PrintgateError::Parameter(format!(
            "unsupported message body {other}"
        ))),
    }
}

fn byte_array(items: &[Value]) -> Result<Vec<u8>> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| PrintgateError::Parameter(format!("invalid byte {item}")))
        })
        .collect()
}

fn encode_text(text: &str, encoding: &str) -> Result<Vec<u8>> {
    match encoding.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Ok(text.as_bytes().to_vec()),
        "latin1" | "binary" => Ok(text.chars().map(|c| c as u32 as u8).collect()),
        "ascii" => Ok(text.chars().map(|c| (c as u32 as u8) & 0x7f).collect()),
        "hex" => hex::decode(text)
            .map_err(|e| PrintgateError::Parameter(format!("invalid hex body: {e}"))),
        other => Err(PrintgateError::Parameter(format!(
            "unsupported body encoding {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Keeps one connection to the transit relay alive until shutdown.
pub struct TransitClient {
    dispatcher: Dispatcher,
    observer: Arc<dyn StatusObserver>,
    config: AppConfig,
    policy: ReconnectPolicy,
}

impl TransitClient {
    pub fn new(dispatcher: Dispatcher, observer: Arc<dyn StatusObserver>, config: AppConfig) -> Self {
        Self {
            dispatcher,
            observer,
            config,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connect, serve, and reconnect until `shutdown` is notified.
    pub async fn run(self, shutdown: Arc<Notify>) {
        let address = relay_address(&self.config.transit_url).to_owned();
        let mut attempt: u32 = 0;

        loop {
            info!(relay = %address, attempt, "connecting to transit relay");
            let connected = tokio::select! {
                _ = shutdown.notified() => return,
                connected = TcpStream::connect(&address) => connected,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    if self.serve(stream, &shutdown).await {
                        return;
                    }
                }
                Err(e) => warn!(relay = %address, error = %e, "transit relay unreachable"),
            }

            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Serve one connection. Returns `true` when shutdown was requested.
    async fn serve(&self, stream: TcpStream, shutdown: &Notify) -> bool {
        let socket_id = Uuid::new_v4().simple().to_string();
        let (mut reader, writer, writer_task) = split_stream(stream);
        let session = TransitSession::new(self.dispatcher.clone(), writer, socket_id, &self.config);

        info!(socket_id = %session.socket_id(), "connected to transit relay");
        self.observer.notify_relay_connected(true);
        if let Err(e) = session.announce(&self.config.transit_token) {
            warn!(socket_id = %session.socket_id(), "announce failed: {e}");
        }

        let stopped = loop {
            tokio::select! {
                _ = shutdown.notified() => break true,
                next = reader.next_frame() => {
                    match next {
                        Ok(Some(frame)) => {
                            if session.handle(frame).is_break() {
                                break false;
                            }
                        }
                        Ok(None) => break false,
                        Err(e) => {
                            warn!(socket_id = %session.socket_id(), error = %e, "transit read failed");
                            break false;
                        }
                    }
                }
            }
        };

        info!(socket_id = %session.socket_id(), "transit relay disconnected");
        self.observer.notify_relay_connected(false);
        writer_task.abort();
        stopped
    }
}

/// `host:port` from a relay URL, with any scheme and trailing slash removed.
fn relay_address(url: &str) -> &str {
    url.split_once("://")
        .map_or(url, |(_, rest)| rest)
        .trim_end_matches('/')
}
