mod aggregate;
mod simulator;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;

use crate::core::config::BatchSettings;
use crate::core::time::now_utc;
use crate::db::types::TaskStatus;

pub(crate) use aggregate::RunningMean;

pub(crate) const MESSAGE_STARTED: &str = "任务开始执行...";
pub(crate) const MESSAGE_PENDING: &str = "任务等待执行";
pub(crate) const MESSAGE_COMPLETED: &str = "任务执行完成";
pub(crate) const MESSAGE_CANCELLED: &str = "任务已取消";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TrackerError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {0} already exists")]
    AlreadyExists(String),
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition { task_id: String, from: &'static str, to: &'static str },
    #[error("task {0} is still running; cancel it first")]
    StillRunning(String),
}

/// Copy of a task's state at one instant.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchTaskSnapshot {
    pub(crate) task_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) total_papers: u32,
    pub(crate) completed_papers: u32,
    pub(crate) failed_papers: u32,
    pub(crate) average_score: f64,
    pub(crate) current_paper: u32,
    pub(crate) message: String,
    pub(crate) start_time: OffsetDateTime,
    pub(crate) last_update_time: OffsetDateTime,
}

#[derive(Debug)]
struct BatchTask {
    task_id: String,
    status: TaskStatus,
    total_papers: u32,
    failed_papers: u32,
    scores: RunningMean,
    current_paper: u32,
    item_in_flight: Option<u32>,
    message: String,
    start_time: OffsetDateTime,
    last_update_time: OffsetDateTime,
}

impl BatchTask {
    fn snapshot(&self) -> BatchTaskSnapshot {
        BatchTaskSnapshot {
            task_id: self.task_id.clone(),
            status: self.status,
            total_papers: self.total_papers,
            completed_papers: self.scores.count(),
            failed_papers: self.failed_papers,
            average_score: self.scores.mean(),
            current_paper: self.current_paper,
            message: self.message.clone(),
            start_time: self.start_time,
            last_update_time: self.last_update_time,
        }
    }

    fn statistics(&self) -> BatchTaskStatistics {
        let processed = self.processed();
        let pass_rate = if processed == 0 {
            0.0
        } else {
            f64::from(self.scores.count()) / f64::from(processed)
        };

        BatchTaskStatistics {
            task_id: self.task_id.clone(),
            status: self.status,
            total_papers: self.total_papers,
            processed_papers: processed,
            completed_papers: self.scores.count(),
            failed_papers: self.failed_papers,
            average_score: self.scores.mean(),
            pass_rate,
        }
    }

    fn processed(&self) -> u32 {
        self.scores.count().saturating_add(self.failed_papers)
    }

    /// Running tasks take any update. A cancelled task still takes the one
    /// item that had already started when it was cancelled.
    fn accepts_progress(&self, item_index: u32) -> bool {
        match self.status {
            TaskStatus::Running => true,
            TaskStatus::Cancelled => self.item_in_flight == Some(item_index),
            _ => false,
        }
    }

    fn transition(&mut self, to: TaskStatus, message: &str) {
        self.status = to;
        self.message = message.to_string();
        self.last_update_time = now_utc();
    }
}

/// Aggregate view of one task, read under the registry lock.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchTaskStatistics {
    pub(crate) task_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) total_papers: u32,
    pub(crate) processed_papers: u32,
    pub(crate) completed_papers: u32,
    pub(crate) failed_papers: u32,
    pub(crate) average_score: f64,
    /// Share of processed papers that passed, in `0.0..=1.0`.
    pub(crate) pass_rate: f64,
}

/// In-memory registry of batch tasks. All reads and writes of a task's
/// fields happen under one lock.
#[derive(Clone)]
pub(crate) struct BatchTaskTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    tasks: Mutex<HashMap<String, BatchTask>>,
    item_delay: Duration,
    message_every: u32,
}

impl BatchTaskTracker {
    pub(crate) fn new(item_delay: Duration, message_every: u32) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                tasks: Mutex::new(HashMap::new()),
                item_delay,
                message_every: message_every.max(1),
            }),
        }
    }

    pub(crate) fn from_settings(settings: &BatchSettings) -> Self {
        Self::new(settings.item_delay(), settings.message_every)
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, BatchTask>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(
        &self,
        task_id: &str,
        total_papers: u32,
    ) -> Result<BatchTaskSnapshot, TrackerError> {
        let mut tasks = self.tasks();
        if tasks.contains_key(task_id) {
            return Err(TrackerError::AlreadyExists(task_id.to_string()));
        }

        let now = now_utc();
        let task = BatchTask {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            total_papers,
            failed_papers: 0,
            scores: RunningMean::default(),
            current_paper: 0,
            item_in_flight: None,
            message: MESSAGE_PENDING.to_string(),
            start_time: now,
            last_update_time: now,
        };
        let snapshot = task.snapshot();
        tasks.insert(task_id.to_string(), task);

        Ok(snapshot)
    }

    /// Moves a pending task to running and spawns its executor loop.
    pub(crate) fn start(&self, task_id: &str) -> Result<BatchTaskSnapshot, TrackerError> {
        let snapshot = {
            let mut tasks = self.tasks();
            let task =
                tasks.get_mut(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Pending {
                return Err(TrackerError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: task.status.as_str(),
                    to: TaskStatus::Running.as_str(),
                });
            }
            task.transition(TaskStatus::Running, MESSAGE_STARTED);
            task.start_time = task.last_update_time;
            task.snapshot()
        };

        tracing::info!(task_id, total_papers = snapshot.total_papers, "Batch task started");
        tokio::spawn(simulator::run(self.clone(), task_id.to_string()));

        Ok(snapshot)
    }

    pub(crate) fn launch(
        &self,
        task_id: &str,
        total_papers: u32,
    ) -> Result<BatchTaskSnapshot, TrackerError> {
        self.register(task_id, total_papers)?;
        self.start(task_id)
    }

    /// Marks `item_index` as started. Returns `false` once the task is no
    /// longer running, which tells the executor to stop.
    pub(crate) fn begin_item(&self, task_id: &str, item_index: u32) -> Result<bool, TrackerError> {
        let mut tasks = self.tasks();
        let task =
            tasks.get_mut(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;

        if task.status != TaskStatus::Running {
            return Ok(false);
        }

        task.item_in_flight = Some(item_index);
        Ok(true)
    }

    /// Records one processed item. Returns `false` without changes when the
    /// task does not accept the item or `total_papers` is already reached.
    pub(crate) fn update_progress(
        &self,
        task_id: &str,
        item_index: u32,
        success: bool,
        score: f64,
    ) -> Result<bool, TrackerError> {
        let mut tasks = self.tasks();
        let task =
            tasks.get_mut(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;

        if !task.accepts_progress(item_index) || task.processed() >= task.total_papers {
            return Ok(false);
        }

        task.item_in_flight = None;
        task.current_paper = item_index;
        if success {
            task.scores.push(score);
        } else {
            task.failed_papers += 1;
        }
        task.last_update_time = now_utc();

        Ok(true)
    }

    /// Replaces the progress message of a task that has not finished.
    pub(crate) fn update_message(&self, task_id: &str, message: &str) -> Result<bool, TrackerError> {
        let mut tasks = self.tasks();
        let task =
            tasks.get_mut(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            return Ok(false);
        }

        task.message = message.to_string();
        task.last_update_time = now_utc();
        Ok(true)
    }

    pub(crate) fn cancel(&self, task_id: &str) -> Result<BatchTaskSnapshot, TrackerError> {
        let snapshot = {
            let mut tasks = self.tasks();
            let task =
                tasks.get_mut(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
            if task.status.is_terminal() {
                return Err(TrackerError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: task.status.as_str(),
                    to: TaskStatus::Cancelled.as_str(),
                });
            }
            task.transition(TaskStatus::Cancelled, MESSAGE_CANCELLED);
            task.snapshot()
        };

        tracing::info!(
            task_id,
            completed_papers = snapshot.completed_papers,
            failed_papers = snapshot.failed_papers,
            "Batch task cancelled"
        );
        metrics::counter!("batch_tasks_total", "status" => "cancelled").increment(1);

        Ok(snapshot)
    }

    /// Finishes a running task; a task cancelled in the meantime stays cancelled.
    pub(crate) fn complete(&self, task_id: &str) -> Result<bool, TrackerError> {
        self.finish(task_id, TaskStatus::Completed, MESSAGE_COMPLETED)
    }

    pub(crate) fn fail(&self, task_id: &str, message: &str) -> Result<bool, TrackerError> {
        self.finish(task_id, TaskStatus::Failed, message)
    }

    fn finish(&self, task_id: &str, to: TaskStatus, message: &str) -> Result<bool, TrackerError> {
        let snapshot = {
            let mut tasks = self.tasks();
            let task =
                tasks.get_mut(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Running {
                return Ok(false);
            }
            task.transition(to, message);
            task.snapshot()
        };

        tracing::info!(
            task_id,
            status = to.as_str(),
            completed_papers = snapshot.completed_papers,
            failed_papers = snapshot.failed_papers,
            average_score = snapshot.average_score,
            "Batch task finished"
        );
        metrics::counter!("batch_tasks_total", "status" => to.as_str()).increment(1);

        Ok(true)
    }

    /// Drops a task from the registry. Running tasks must be cancelled first.
    pub(crate) fn remove(&self, task_id: &str) -> Result<BatchTaskSnapshot, TrackerError> {
        let removed = {
            let mut tasks = self.tasks();
            let task =
                tasks.get(task_id).ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
            if task.status == TaskStatus::Running {
                return Err(TrackerError::StillRunning(task_id.to_string()));
            }
            tasks.remove(task_id).map(|task| task.snapshot())
        };

        let snapshot = removed.ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;
        tracing::info!(task_id, status = snapshot.status.as_str(), "Batch task removed");

        Ok(snapshot)
    }

    pub(crate) fn statistics(&self, task_id: &str) -> Option<BatchTaskStatistics> {
        self.tasks().get(task_id).map(BatchTask::statistics)
    }

    pub(crate) fn get(&self, task_id: &str) -> Option<BatchTaskSnapshot> {
        self.tasks().get(task_id).map(BatchTask::snapshot)
    }

    /// Snapshots of every task, oldest first.
    pub(crate) fn get_all(&self) -> Vec<BatchTaskSnapshot> {
        let mut snapshots: Vec<BatchTaskSnapshot> =
            self.tasks().values().map(BatchTask::snapshot).collect();
        snapshots.sort_by(|left, right| {
            left.start_time.cmp(&right.start_time).then_with(|| left.task_id.cmp(&right.task_id))
        });
        snapshots
    }

    pub(crate) fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks().get(task_id).map(|task| task.status)
    }

    fn item_delay(&self) -> Duration {
        self.inner.item_delay
    }

    fn message_every(&self) -> u32 {
        self.inner.message_every
    }
}
