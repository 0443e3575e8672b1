// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print pipeline: the job closure the runner executes for every submission.
//
//   submit ──► record pending ──► runner queue
//                                     │ (dispatch, one at a time)
//                                     ▼
//              register completion ─► health check on a fresh snapshot
//                                     │ fault / not found    │ resolved
//                                     ▼                      ▼
//                          invoke(failed)           executor.print(..) ─► invoke(outcome)
//                                     └──────────┬───────────┘
//                                                ▼
//                        await completion ─► persist ─► route result ─► release runner
//
// Every path, including a printer fault, a duplicate task id and an executor
// panic, goes through `finish` and releases the runner exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tracing::{error, info, instrument, warn};

use printgate_bridge::PlatformBridge;
use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{
    ClientType, JobDescriptor, JobRecord, JobStatus, PrintOutcome, PrintRequest, TaskId,
};

use crate::correlation::TaskMap;
use crate::health;
use crate::observer::StatusObserver;
use crate::records::JobStore;
use crate::runner::{JobDone, JobRunner};

/// Terminal result of one job, handed to whoever submitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub task_id: TaskId,
    pub client_type: ClientType,
    pub socket_id: Option<String>,
    pub reply_id: Option<String>,
    pub template_id: Option<String>,
    pub success: bool,
    /// Same text that is persisted with the record.
    pub msg: String,
}

/// Destination for a job's terminal result (e.g. the relay connection the
/// job arrived on).
pub trait ResultRoute: Send + Sync {
    fn deliver(&self, result: JobResult);
}

/// Owns the runner, the correlation map and the record store, and wires
/// them to the platform bridge. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    runner: JobRunner,
    tasks: Arc<TaskMap>,
    bridge: Arc<dyn PlatformBridge>,
    records: Arc<Mutex<JobStore>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("runner", &self.runner)
            .field("pending_tasks", &self.tasks.len())
            .field("platform", &self.bridge.platform_name())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        bridge: Arc<dyn PlatformBridge>,
        records: JobStore,
        observer: Arc<dyn StatusObserver>,
    ) -> Self {
        Self {
            runner: JobRunner::new(observer),
            tasks: Arc::new(TaskMap::new()),
            bridge,
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn bridge(&self) -> &Arc<dyn PlatformBridge> {
        &self.bridge
    }

    /// The correlation map, for collaborators that learn outcomes out of band.
    pub fn tasks(&self) -> &Arc<TaskMap> {
        &self.tasks
    }

    pub fn is_busy(&self) -> bool {
        self.runner.is_busy()
    }

    pub fn pending(&self) -> usize {
        self.runner.pending()
    }

    fn records(&self) -> MutexGuard<'_, JobStore> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status query for a previously accepted job.
    pub fn record(&self, task_id: &TaskId) -> Result<Option<JobRecord>> {
        self.records().get_record(task_id)
    }

    pub fn recent_records(&self, limit: usize) -> Result<Vec<JobRecord>> {
        self.records().recent_records(limit)
    }

    /// Accept a job: record it as pending and queue it behind any job
    /// already in flight. Returns the task id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(task_id = %job.task_id, client = job.client_type.as_str()))]
    pub fn submit(&self, job: JobDescriptor, route: Option<Arc<dyn ResultRoute>>) -> TaskId {
        let task_id = job.task_id.clone();

        if let Err(e) = self.records().insert_job(&JobRecord::pending(&job)) {
            warn!(task_id = %task_id, "could not record pending job: {e}");
        }

        let this = self.clone();
        self.runner.submit(Box::new(move |done| this.start(job, route, done)));
        info!(task_id = %task_id, queued = self.runner.pending(), "job accepted");
        task_id
    }

    /// Runner entry point. Dropping `done` on any early return still
    /// releases the runner.
    fn start(self, job: JobDescriptor, route: Option<Arc<dyn ResultRoute>>, done: JobDone) {
        let completion = match self.tasks.register(job.task_id.clone()) {
            Ok(completion) => completion,
            Err(e) => {
                error!(task_id = %job.task_id, kind = e.kind(), "cannot dispatch job: {e}");
                let reason = e.to_string();
                let result = self.finish(&job, Err(reason.clone()), PrintOutcome::failed(reason));
                if let Some(route) = route {
                    route.deliver(result);
                }
                done.complete();
                return;
            }
        };

        tokio::spawn(async move {
            let launched = self.launch(&job);
            let outcome = completion.wait().await;
            let result = self.finish(&job, launched, outcome);
            if let Some(route) = route {
                route.deliver(result);
            }
            done.complete();
        });
    }

    /// Run the health check and, if it passes, start the executor.
    ///
    /// Returns the resolved printer, or the failure message when the job
    /// never reached the executor. Either way the outcome arrives via the
    /// correlation map.
    fn launch(&self, job: &JobDescriptor) -> std::result::Result<String, String> {
        let snapshot = self.bridge.printers();
        let model = self.bridge.status_model();

        let printer = match health::resolve_printer(&snapshot, &job.printer_name, model) {
            Ok(printer) => printer,
            Err(e) => {
                let reason = match &e {
                    PrintgateError::PrinterFault(_) => format!(
                        "{} {} template [{}] print failed, printer fault, printer: {}",
                        job.client_type.as_str(),
                        job.task_id,
                        job.template_id.as_deref().unwrap_or_default(),
                        job.printer_name
                    ),
                    _ => e.to_string(),
                };
                warn!(task_id = %job.task_id, kind = e.kind(), "{reason}");
                self.resolve(&job.task_id, PrintOutcome::failed(reason.clone()));
                return Err(reason);
            }
        };

        let request = PrintRequest {
            task_id: job.task_id.clone(),
            printer_name: printer.clone(),
            options: job.options.clone(),
            payload: job.payload.clone(),
        };
        let bridge = Arc::clone(&self.bridge);
        let printing = AssertUnwindSafe(async move { bridge.print(request).await }).catch_unwind();
        let tasks = Arc::clone(&self.tasks);
        let task_id = job.task_id.clone();
        tokio::spawn(async move {
            let outcome = match printing.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = PrintgateError::Executor("executor panicked".into());
                    error!(task_id = %task_id, kind = err.kind(), "{err}");
                    PrintOutcome::failed(err.to_string())
                }
            };
            if let Err(e) = tasks.invoke(&task_id, outcome) {
                warn!(task_id = %task_id, "executor outcome dropped: {e}");
            }
        });
        Ok(printer)
    }

    fn resolve(&self, task_id: &TaskId, outcome: PrintOutcome) {
        if let Err(e) = self.tasks.invoke(task_id, outcome) {
            warn!(task_id = %task_id, "completion dropped: {e}");
        }
    }

    /// Persist the terminal state and build the caller-facing result.
    fn finish(
        &self,
        job: &JobDescriptor,
        launched: std::result::Result<String, String>,
        outcome: PrintOutcome,
    ) -> JobResult {
        let printer = launched.as_deref().unwrap_or(&job.printer_name).to_owned();
        let msg = match launched {
            Err(preflight) => preflight,
            Ok(_) if outcome.success => {
                let pages = outcome
                    .page_count
                    .map_or_else(|| "unknown".to_owned(), |n| n.to_string());
                format!("completed - pages: {pages}, printer: {printer}")
            }
            Ok(_) => {
                let reason = outcome.failure_reason.as_deref().unwrap_or("unknown");
                format!("failed - reason: {reason}, printer: {printer}")
            }
        };
        let status = if outcome.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        if outcome.success {
            info!(task_id = %job.task_id, printer = %printer, "job completed");
        } else {
            warn!(task_id = %job.task_id, printer = %printer, "job failed: {msg}");
        }

        if let Err(e) = self.records().update_status(&job.task_id, status, &msg) {
            warn!(task_id = %job.task_id, kind = e.kind(), "status not persisted: {e}");
        }

        JobResult {
            task_id: job.task_id.clone(),
            client_type: job.client_type,
            socket_id: job.socket_id.clone(),
            reply_id: job.reply_id.clone(),
            template_id: job.template_id.clone(),
            success: outcome.success,
            msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use futures::future::BoxFuture;
    use printgate_bridge::{PrintExecutor, PrinterDirectory};
    use printgate_core::types::{JobPayload, PaperSizeInfo, PrinterRecord, StatusModel};
    use tokio::sync::mpsc;

    use crate::observer::NoopObserver;

    /// Executor that counts overlap and remembers which printers it was given.
    #[derive(Default)]
    struct FakeBridge {
        printers: Vec<PrinterRecord>,
        calls: Mutex<Vec<String>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl PlatformBridge for FakeBridge {
        fn platform_name(&self) -> &str {
            "fake"
        }
    }

    impl PrintExecutor for FakeBridge {
        fn print(&self, request: PrintRequest) -> BoxFuture<'static, PrintOutcome> {
            self.calls.lock().unwrap().push(request.printer_name.clone());
            let in_flight = Arc::clone(&self.in_flight);
            let max = Arc::clone(&self.max_in_flight);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                PrintOutcome::succeeded(Some(1))
            }
            .boxed()
        }
    }

    impl PrinterDirectory for FakeBridge {
        fn printers(&self) -> Vec<PrinterRecord> {
            self.printers.clone()
        }
        fn status_model(&self) -> StatusModel {
            StatusModel::Cups
        }
        fn paper_sizes(&self, _printer: Option<&str>) -> Result<Vec<PaperSizeInfo>> {
            Ok(Vec::new())
        }
    }

    struct ChannelRoute(mpsc::UnboundedSender<JobResult>);

    impl ResultRoute for ChannelRoute {
        fn deliver(&self, result: JobResult) {
            let _ = self.0.send(result);
        }
    }

    fn setup() -> (Dispatcher, Arc<FakeBridge>) {
        let bridge = Arc::new(FakeBridge {
            printers: vec![
                PrinterRecord::new("P1", 3, false),
                PrinterRecord::new("P2", 3, true),
                PrinterRecord::new("Pbad", 5, false),
            ],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(
            bridge.clone(),
            JobStore::open_in_memory().unwrap(),
            Arc::new(NoopObserver),
        );
        (dispatcher, bridge)
    }

    #[tokio::test]
    async fn jobs_resolve_printers_and_run_one_at_a_time() {
        let (dispatcher, bridge) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route: Arc<dyn ResultRoute> = Arc::new(ChannelRoute(tx));

        let ids: Vec<TaskId> = ["P1", "", "Pbad", "P1"]
            .into_iter()
            .map(|printer| {
                let job = JobDescriptor::local(printer, JobPayload::default());
                dispatcher.submit(job, Some(route.clone()))
            })
            .collect();

        let mut results = Vec::new();
        for _ in 0..ids.len() {
            results.push(rx.recv().await.expect("result"));
        }

        // FIFO completion order
        let order: Vec<_> = results.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(order, ids);

        // the faulted printer never reached the executor
        assert_eq!(*bridge.calls.lock().unwrap(), vec!["P1", "P2", "P1"]);
        assert_eq!(bridge.max_in_flight.load(Ordering::SeqCst), 1);

        assert!(!results[2].success);
        assert!(results[2].msg.contains("printer fault"));
        assert!(results[3].success);

        let failed = dispatcher.record(&ids[2]).unwrap().unwrap();
        assert_eq!(failed.print_status, JobStatus::Failed);
        let done = dispatcher.record(&ids[1]).unwrap().unwrap();
        assert_eq!(done.print_status, JobStatus::Completed);
        assert_eq!(done.msg.as_deref(), Some("completed - pages: 1, printer: P2"));

        assert!(!dispatcher.is_busy());
        assert!(dispatcher.tasks().is_empty());
    }

    #[tokio::test]
    async fn no_default_printer_fails_through_completion_path() {
        let bridge = Arc::new(FakeBridge {
            printers: vec![PrinterRecord::new("P1", 3, false)],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(
            bridge.clone(),
            JobStore::open_in_memory().unwrap(),
            Arc::new(NoopObserver),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route: Arc<dyn ResultRoute> = Arc::new(ChannelRoute(tx));

        let mut job = JobDescriptor::transit("Elsewhere", JobPayload::default(), "sock-1");
        job.reply_id = Some("r9".into());
        dispatcher.submit(job, Some(route.clone()));
        dispatcher.submit(JobDescriptor::local("P1", JobPayload::default()), Some(route));

        let first = rx.recv().await.unwrap();
        assert!(!first.success);
        assert_eq!(first.client_type, ClientType::Transit);
        assert_eq!(first.socket_id.as_deref(), Some("sock-1"));
        assert_eq!(first.reply_id.as_deref(), Some("r9"));

        let second = rx.recv().await.unwrap();
        assert!(second.success);
        assert_eq!(*bridge.calls.lock().unwrap(), vec!["P1"]);
    }

    #[tokio::test]
    async fn duplicate_task_id_does_not_wedge_runner() {
        let (dispatcher, _bridge) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route: Arc<dyn ResultRoute> = Arc::new(ChannelRoute(tx));

        let job = JobDescriptor::local("P1", JobPayload::default());
        // A completion already registered under the same id makes dispatch
        // of this job fail; the runner must still move on.
        let _held = dispatcher.tasks().register(job.task_id.clone()).unwrap();
        let duplicate = dispatcher.submit(job, Some(route.clone()));

        let next = dispatcher.submit(JobDescriptor::local("P1", JobPayload::default()), Some(route));

        let rejected = rx.recv().await.unwrap();
        assert_eq!(rejected.task_id, duplicate);
        assert!(!rejected.success);
        assert!(rejected.msg.contains("already queued or in flight"));
        let record = dispatcher.record(&duplicate).unwrap().unwrap();
        assert_eq!(record.print_status, JobStatus::Failed);

        let result = rx.recv().await.unwrap();
        assert_eq!(result.task_id, next);
        assert!(result.success);
    }

    /// Executor whose first print panics; later prints succeed.
    #[derive(Default)]
    struct PanicOnceBridge {
        calls: AtomicUsize,
    }

    impl PlatformBridge for PanicOnceBridge {
        fn platform_name(&self) -> &str {
            "panic-once"
        }
    }

    impl PrintExecutor for PanicOnceBridge {
        fn print(&self, _request: PrintRequest) -> BoxFuture<'static, PrintOutcome> {
            let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    panic!("driver crashed");
                }
                PrintOutcome::succeeded(Some(2))
            }
            .boxed()
        }
    }

    impl PrinterDirectory for PanicOnceBridge {
        fn printers(&self) -> Vec<PrinterRecord> {
            vec![PrinterRecord::new("P1", 3, true)]
        }
        fn status_model(&self) -> StatusModel {
            StatusModel::Cups
        }
        fn paper_sizes(&self, _printer: Option<&str>) -> Result<Vec<PaperSizeInfo>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn executor_panic_fails_the_job_and_queue_moves_on() {
        let bridge = Arc::new(PanicOnceBridge::default());
        let dispatcher = Dispatcher::new(
            bridge.clone(),
            JobStore::open_in_memory().unwrap(),
            Arc::new(NoopObserver),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let route: Arc<dyn ResultRoute> = Arc::new(ChannelRoute(tx));

        let first = dispatcher.submit(
            JobDescriptor::local("P1", JobPayload::default()),
            Some(route.clone()),
        );
        let second = dispatcher.submit(JobDescriptor::local("P1", JobPayload::default()), Some(route));

        let crashed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(crashed.task_id, first);
        assert!(!crashed.success);
        assert!(crashed.msg.contains("print executor failed: executor panicked"));

        let ran = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ran.task_id, second);
        assert!(ran.success);
        assert_eq!(bridge.calls.load(Ordering::SeqCst), 2);
        assert!(!dispatcher.is_busy());
    }
}
