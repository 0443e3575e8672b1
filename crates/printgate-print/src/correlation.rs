// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Task correlation map.
//
// Maps a task id to the single-shot channel that carries its terminal
// outcome back to the job that is waiting on it. Registration happens when
// a job is dispatched; resolution can come from anywhere that learns the
// outcome (the local executor future, the IPC boundary, a relay peer).
// Decouples "a job was dispatched" from "a job finished".

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{PrintOutcome, TaskId};

/// Pending completions keyed by task id. At most one entry per id.
#[derive(Debug, Default)]
pub struct TaskMap {
    entries: Mutex<HashMap<TaskId, oneshot::Sender<PrintOutcome>>>,
}

/// Receiving half handed to the dispatched job.
#[derive(Debug)]
pub struct TaskCompletion {
    task_id: TaskId,
    rx: oneshot::Receiver<PrintOutcome>,
}

impl TaskCompletion {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Wait for the outcome. A discarded entry resolves as a failure so the
    /// waiting job still terminates.
    pub async fn wait(self) -> PrintOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => PrintOutcome::failed("task completion was discarded"),
        }
    }
}

impl TaskMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TaskId, oneshot::Sender<PrintOutcome>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a completion for `task_id`.
    ///
    /// A second registration for an id that is still pending is a caller
    /// error and leaves the existing entry untouched.
    pub fn register(&self, task_id: TaskId) -> Result<TaskCompletion> {
        let mut entries = self.entries();
        if entries.contains_key(&task_id) {
            return Err(PrintgateError::DuplicateTask(task_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(task_id.clone(), tx);
        debug!(task_id = %task_id, pending = entries.len(), "task completion registered");
        Ok(TaskCompletion { task_id, rx })
    }

    /// Resolve the completion for `task_id` exactly once and remove it.
    ///
    /// Returns `UnknownTask` when nothing is registered (never registered,
    /// already invoked, or discarded).
    pub fn invoke(&self, task_id: &TaskId, outcome: PrintOutcome) -> Result<()> {
        let sender = self.entries().remove(task_id);
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    warn!(task_id = %task_id, "task completion receiver already dropped");
                }
                Ok(())
            }
            None => {
                warn!(task_id = %task_id, "invoke for unregistered task");
                Err(PrintgateError::UnknownTask(task_id.to_string()))
            }
        }
    }

    /// Drop the entry without resolving it. Returns whether one existed.
    pub fn discard(&self, task_id: &TaskId) -> bool {
        self.entries().remove(task_id).is_some()
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.entries().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoke_resolves_registered_completion() {
        let map = TaskMap::new();
        let id = TaskId::from("t1");
        let completion = map.register(id.clone()).expect("register");

        map.invoke(&id, PrintOutcome::succeeded(Some(2))).expect("invoke");
        assert!(map.is_empty());

        let outcome = completion.wait().await;
        assert!(outcome.success);
        assert_eq!(outcome.page_count, Some(2));
    }

    #[test]
    fn second_invoke_is_rejected() {
        let map = TaskMap::new();
        let id = TaskId::from("t1");
        let _completion = map.register(id.clone()).expect("register");

        map.invoke(&id, PrintOutcome::succeeded(None)).expect("first invoke");
        let err = map.invoke(&id, PrintOutcome::succeeded(None)).unwrap_err();
        assert!(matches!(err, PrintgateError::UnknownTask(_)));
    }

    #[test]
    fn unknown_task_is_an_error_not_a_panic() {
        let map = TaskMap::new();
        let err = map
            .invoke(&TaskId::from("ghost"), PrintOutcome::failed("x"))
            .unwrap_err();
        assert!(matches!(err, PrintgateError::UnknownTask(id) if id == "ghost"));
    }

    #[test]
    fn duplicate_registration_keeps_first_entry() {
        let map = TaskMap::new();
        let id = TaskId::from("t1");
        let _first = map.register(id.clone()).expect("register");
        assert!(matches!(
            map.register(id.clone()),
            Err(PrintgateError::DuplicateTask(_))
        ));
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn discarded_completion_resolves_as_failure() {
        let map = TaskMap::new();
        let id = TaskId::from("t1");
        let completion = map.register(id.clone()).expect("register");

        assert!(map.discard(&id));
        assert!(!map.discard(&id));

        let outcome = completion.wait().await;
        assert!(!outcome.success);
    }
}
