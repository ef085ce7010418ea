//! Fire-and-forget scheduler events.
//!
//! Events let outside observers (a UI, an audit log) follow scheduling
//! decisions without polling. Delivery is not guaranteed: a full or
//! closed channel drops the event and scheduling carries on.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::{TaskId, WorkerId};
use crate::tlog_trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskAssigned {
        task_id: TaskId,
        worker_id: WorkerId,
        score: f64,
    },
    TaskReassigned {
        task_id: TaskId,
        from: WorkerId,
        to: WorkerId,
        attempt: usize,
    },
    SpawnRequested {
        template: String,
    },
    SpawnSucceeded {
        template: String,
        worker_id: WorkerId,
    },
    SpawnFailed {
        template: String,
        error: String,
    },
    /// An assignment pass finished.
    BatchComplete {
        assigned: usize,
        unassigned: usize,
    },
    TaskStarted {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskCompleted {
        task_id: TaskId,
    },
    TaskFailed {
        task_id: TaskId,
        reason: String,
    },
    AllTasksComplete,
}

/// Optional sender for [`SchedulerEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink plus the receiving end of a fresh bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                tlog_trace!("Scheduler event dropped: {}", e);
            }
        }
    }
}
