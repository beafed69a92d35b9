use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::types::TaskStatus;
use crate::tasks::batch::{BatchTaskSnapshot, BatchTaskStatistics};

fn default_auto_start() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskCreate {
    #[serde(default)]
    pub(crate) task_id: Option<String>,
    #[validate(range(min = 1, max = 10_000, message = "totalPapers must be between 1 and 10000"))]
    pub(crate) total_papers: u32,
    #[serde(default = "default_auto_start")]
    pub(crate) auto_start: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskStatusResponse {
    pub(crate) task_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) total_papers: u32,
    pub(crate) completed_papers: u32,
    pub(crate) failed_papers: u32,
    pub(crate) average_score: f64,
    pub(crate) current_paper: u32,
    pub(crate) message: String,
    pub(crate) start_time: String,
    pub(crate) last_update_time: String,
}

impl From<BatchTaskSnapshot> for TaskStatusResponse {
    fn from(snapshot: BatchTaskSnapshot) -> Self {
        Self {
            task_id: snapshot.task_id,
            status: snapshot.status,
            total_papers: snapshot.total_papers,
            completed_papers: snapshot.completed_papers,
            failed_papers: snapshot.failed_papers,
            average_score: snapshot.average_score,
            current_paper: snapshot.current_paper,
            message: snapshot.message,
            start_time: format_offset(snapshot.start_time),
            last_update_time: format_offset(snapshot.last_update_time),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskListResponse {
    pub(crate) items: Vec<TaskStatusResponse>,
    pub(crate) total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskStatisticsResponse {
    pub(crate) task_id: String,
    pub(crate) status: TaskStatus,
    pub(crate) total_papers: u32,
    pub(crate) processed_papers: u32,
    pub(crate) completed_papers: u32,
    pub(crate) failed_papers: u32,
    pub(crate) average_score: f64,
    pub(crate) pass_rate: f64,
}

impl From<BatchTaskStatistics> for TaskStatisticsResponse {
    fn from(stats: BatchTaskStatistics) -> Self {
        Self {
            task_id: stats.task_id,
            status: stats.status,
            total_papers: stats.total_papers,
            processed_papers: stats.processed_papers,
            completed_papers: stats.completed_papers,
            failed_papers: stats.failed_papers,
            average_score: stats.average_score,
            pass_rate: stats.pass_rate,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TaskDeletedResponse {
    pub(crate) task_id: String,
    pub(crate) status: &'static str,
    pub(crate) message: &'static str,
}
