use crate::types::ExecutionStatus;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Aggregate counters carried on terminal job events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStatsSnapshot {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// State/progress change for one execution.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub execution_id: u64,
    pub status: ExecutionStatus,
    pub progress: u8,
    pub stats: Option<JobStatsSnapshot>,
}

/// Publish/subscribe bus for job observers: one topic per execution id plus
/// a global all-jobs topic, so a live view can watch without polling.
#[derive(Debug)]
pub struct ProgressBus {
    capacity: usize,
    global: broadcast::Sender<JobEvent>,
    jobs: RwLock<HashMap<u64, broadcast::Sender<JobEvent>>>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity.max(1));
        Self {
            capacity: capacity.max(1),
            global,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<JobEvent> {
        self.global.subscribe()
    }

    pub fn subscribe_job(&self, execution_id: u64) -> broadcast::Receiver<JobEvent> {
        self.job_sender(execution_id).subscribe()
    }

    /// Fan the event out to both topics. Send errors just mean nobody is
    /// listening right now; the bus is fire-and-forget.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.job_sender(event.execution_id).send(event.clone());
        let _ = self.global.send(event);
    }

    /// Drops the per-job topic once the execution is terminal and observers
    /// have had their receivers handed out.
    pub fn retire_job(&self, execution_id: u64) {
        self.jobs.write().remove(&execution_id);
    }

    fn job_sender(&self, execution_id: u64) -> broadcast::Sender<JobEvent> {
        if let Some(sender) = self.jobs.read().get(&execution_id) {
            return sender.clone();
        }
        let mut guard = self.jobs.write();
        guard
            .entry(execution_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(256)
    }
}
