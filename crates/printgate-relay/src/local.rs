// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local listener: the server role of the relay channel.
//
// Callers on this machine (or the LAN) connect over TCP and exchange
// line-delimited JSON frames:
//
//   -> {"event": "news", "replyId": "a1", "token": "..", "data": {..}}
//   <- {"event": "response", "replyId": "a1", "status": 200, "msg": "..", "data": ".."}
//
// # Events
//
//   - printerList        current printer snapshot
//   - getPaperSizeInfo   paper sizes for `data.printer`, or for all printers
//   - news               submit a print job, answers with its task id
//   - printInfo          persisted record for `data.taskId`
//   - printByFragments   one chunk of a large `news` body
//
// A configured token must be presented on every frame; a mismatch answers
// 401 and the frame is not processed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use printgate_core::config::AppConfig;
use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::TaskId;
use printgate_print::{Dispatcher, FragmentWatchdog, TemplateRegistry};

use crate::events::InboundFrame;
use crate::submission;
use crate::transport::split_stream;

/// Answer to one local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub msg: String,
    #[serde(default)]
    pub data: Value,
}

impl ApiResponse {
    pub fn ok(msg: impl Into<String>, data: Value) -> Self {
        Self {
            status: 200,
            msg: msg.into(),
            data,
        }
    }

    pub fn error(status: u16, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
            data: Value::Null,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

impl From<PrintgateError> for ApiResponse {
    fn from(err: PrintgateError) -> Self {
        Self::error(500, err.to_string())
    }
}

#[derive(Serialize)]
struct ResponseFrame<'a> {
    event: &'static str,
    #[serde(rename = "replyId")]
    reply_id: Option<String>,
    #[serde(flatten)]
    response: &'a ApiResponse,
}

#[derive(Debug, Deserialize)]
struct FragmentChunk {
    id: String,
    index: u32,
    total: u32,
    fragment: String,
}

/// Operations behind the local events.
#[derive(Debug)]
pub struct LocalService {
    dispatcher: Dispatcher,
    templates: Arc<TemplateRegistry>,
    fragments: Arc<FragmentWatchdog>,
    default_printer: Option<String>,
    token: String,
}

impl LocalService {
    pub fn new(
        dispatcher: Dispatcher,
        templates: Arc<TemplateRegistry>,
        fragments: Arc<FragmentWatchdog>,
        config: &AppConfig,
    ) -> Self {
        Self {
            dispatcher,
            templates,
            fragments,
            default_printer: config.default_printer().map(str::to_owned),
            token: config.token.clone(),
        }
    }

    /// Tokenless configurations accept every caller.
    pub fn authorized(&self, presented: Option<&str>) -> bool {
        self.token.is_empty() || presented == Some(self.token.as_str())
    }

    pub fn handle(&self, frame: &InboundFrame) -> ApiResponse {
        if !self.authorized(frame.token.as_deref()) {
            warn!(event = %frame.event, "rejected frame with mismatched token");
            return ApiResponse::error(401, "token mismatch, check the configured token");
        }

        match frame.event.as_str() {
            "printerList" => self.printer_list(),
            "getPaperSizeInfo" => {
                self.paper_size_info(frame.data.get("printer").and_then(Value::as_str))
            }
            "news" => match self.submit_print(&frame.data) {
                Ok(task_id) => ApiResponse::ok("print job submitted", json!(task_id)),
                Err(e) => {
                    warn!(kind = e.kind(), "print submission rejected: {e}");
                    e.into()
                }
            },
            "printInfo" => self.print_info(frame.data.get("taskId").and_then(Value::as_str)),
            "printByFragments" => self.print_by_fragments(&frame.data),
            other => ApiResponse::error(404, format!("unknown event {other:?}")),
        }
    }

    pub fn printer_list(&self) -> ApiResponse {
        let printers = self.dispatcher.bridge().printers();
        ApiResponse::ok("printer list", json!(printers))
    }

    pub fn paper_size_info(&self, printer: Option<&str>) -> ApiResponse {
        let printer = printer.filter(|p| !p.is_empty());
        match self.dispatcher.bridge().paper_sizes(printer) {
            Ok(mut sizes) => match printer {
                Some(name) => match sizes.pop() {
                    Some(info) => ApiResponse::ok(format!("paper sizes for {name}"), json!(info)),
                    None => ApiResponse::error(500, format!("no paper size info for printer {name}")),
                },
                None => ApiResponse::ok("paper sizes for all printers", json!(sizes)),
            },
            Err(PrintgateError::PlatformUnavailable) => {
                ApiResponse::error(500, "paper size query is only supported on windows")
            }
            Err(e) => ApiResponse::error(500, format!("paper size query failed: {e}")),
        }
    }

    /// Validate, render and queue a local print job. Returns as soon as the
    /// job is accepted; the outcome is read later through `printInfo`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit_print(&self, data: &Value) -> Result<TaskId> {
        let job = submission::local_job(data, self.default_printer.as_deref(), &self.templates)?;
        Ok(self.dispatcher.submit(job, None))
    }

    pub fn print_info(&self, task_id: Option<&str>) -> ApiResponse {
        let Some(task_id) = task_id.filter(|id| !id.is_empty()) else {
            return ApiResponse::error(500, "parameter error: missing taskId");
        };
        match self.dispatcher.record(&TaskId::from(task_id)) {
            Ok(Some(record)) => ApiResponse::ok(
                "query succeeded",
                json!({
                    "task_id": record.task_id,
                    "template_id": record.template_id,
                    "print_status": record.print_status,
                    "print_time": record.print_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                    "msg": record.msg,
                }),
            ),
            Ok(None) => ApiResponse::error(500, "empty result"),
            Err(e) => e.into(),
        }
    }

    /// Accept one chunk of a `news` body. The last chunk submits the
    /// reassembled job.
    pub fn print_by_fragments(&self, data: &Value) -> ApiResponse {
        let chunk: FragmentChunk = match serde_json::from_value(data.clone()) {
            Ok(chunk) => chunk,
            Err(e) => return ApiResponse::error(500, format!("parameter error: {e}")),
        };

        let assembled = match self.fragments.accept_chunk(
            &chunk.id,
            chunk.index,
            chunk.total,
            chunk.fragment.into_bytes(),
        ) {
            Ok(assembled) => assembled,
            Err(e) => return e.into(),
        };
        let Some(bytes) = assembled else {
            debug!(fragment_id = %chunk.id, index = chunk.index, "fragment stored");
            return ApiResponse::ok(
                "fragment received",
                json!({"id": chunk.id, "index": chunk.index, "total": chunk.total}),
            );
        };

        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(e) => {
                return ApiResponse::error(500, format!("parameter error: reassembled body: {e}"));
            }
        };
        match self.submit_print(&body) {
            Ok(task_id) => ApiResponse::ok("print job submitted", json!(task_id)),
            Err(e) => e.into(),
        }
    }
}

/// TCP accept loop for [`LocalService`].
pub struct LocalListener {
    service: Arc<LocalService>,
    shutdown: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
    local_addr: Option<SocketAddr>,
}

impl LocalListener {
    pub fn new(service: Arc<LocalService>) -> Self {
        Self {
            service,
            shutdown: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            local_addr: None,
        }
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind `addr` and start accepting connections in a background task.
    /// Returns the bound address (useful with port 0).
    pub async fn start(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        if let Some(bound) = self.local_addr {
            debug!(addr = %bound, "local listener already running");
            return Ok(bound);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PrintgateError::Relay(format!("bind {addr}: {e}")))?;
        let bound = listener.local_addr()?;
        info!(addr = %bound, "local listener started");

        let shutdown = Arc::clone(&self.shutdown);
        let service = Arc::clone(&self.service);
        let active = Arc::clone(&self.active_connections);
        self.task_handle = Some(tokio::spawn(async move {
            accept_loop(listener, shutdown, service, active).await;
        }));
        self.local_addr = Some(bound);
        Ok(bound)
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(addr) = self.local_addr.take() else {
            return Ok(());
        };
        self.shutdown.notify_one();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| PrintgateError::Relay(format!("listener task join: {e}")))?;
        }
        info!(addr = %addr, "local listener stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    shutdown: Arc<Notify>,
    service: Arc<LocalService>,
    active: Arc<AtomicU32>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop received shutdown signal");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "local connection");
                        let service = Arc::clone(&service);
                        let active = Arc::clone(&active);
                        tokio::spawn(async move {
                            active.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = handle_connection(stream, peer, service).await {
                                warn!(peer = %peer, error = %e, "local connection ended with error");
                            }
                            active.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<LocalService>,
) -> Result<()> {
    let (mut reader, writer, writer_task) = split_stream(stream);

    while let Some(frame) = reader.next_frame().await? {
        let reply_id = frame.reply_id();
        info!(peer = %peer, event = %frame.event, reply_id = ?reply_id, "local event");
        let response = service.handle(&frame);
        writer.send(&ResponseFrame {
            event: "response",
            reply_id,
            response: &response,
        })?;
    }

    drop(writer);
    let _ = writer_task.await;
    debug!(peer = %peer, "local connection closed");
    Ok(())
}
