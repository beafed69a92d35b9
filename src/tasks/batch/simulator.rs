use super::{BatchTaskTracker, TrackerError};

const BASE_SCORE: u32 = 60;
const SCORE_SPREAD: u32 = 40;
const PASSING_SCORE: u32 = 60;

/// Executor loop for one batch task. Stops at the next item boundary once
/// the task is no longer running.
pub(super) async fn run(tracker: BatchTaskTracker, task_id: String) {
    match step_through(&tracker, &task_id).await {
        Ok(()) => {}
        Err(TrackerError::NotFound(_)) => {
            tracing::debug!(task_id = %task_id, "Batch task removed, executor exiting");
        }
        Err(err) => fail(&tracker, &task_id, err),
    }
}

fn fail(tracker: &BatchTaskTracker, task_id: &str, err: TrackerError) {
    tracing::error!(task_id, error = %err, "Batch task executor failed");
    if let Err(err) = tracker.fail(task_id, &format!("任务执行失败: {err}")) {
        tracing::warn!(task_id, error = %err, "Failed to mark batch task failed");
    }
}

async fn step_through(tracker: &BatchTaskTracker, task_id: &str) -> Result<(), TrackerError> {
    let total = tracker
        .get(task_id)
        .map(|snapshot| snapshot.total_papers)
        .ok_or_else(|| TrackerError::NotFound(task_id.to_string()))?;

    for index in 1..=total {
        if !tracker.begin_item(task_id, index)? {
            tracing::debug!(task_id, index, "Batch task no longer running, stopping");
            return Ok(());
        }

        tokio::time::sleep(tracker.item_delay()).await;

        let score = simulated_score(index);
        let applied =
            tracker.update_progress(task_id, index, score >= PASSING_SCORE, f64::from(score))?;
        if !applied {
            return Ok(());
        }

        if reports_progress(index, total, tracker.message_every()) {
            let average = tracker.get(task_id).map(|snapshot| snapshot.average_score).unwrap_or(0.0);
            tracker.update_message(task_id, &progress_message(index, total, average))?;
        }
    }

    tracker.complete(task_id)?;
    Ok(())
}

fn simulated_score(index: u32) -> u32 {
    BASE_SCORE + index % SCORE_SPREAD
}

fn reports_progress(index: u32, total: u32, every: u32) -> bool {
    index % every == 0 || index == total
}

fn progress_message(index: u32, total: u32, average: f64) -> String {
    format!("已处理 {index}/{total} 张试卷，平均分: {average:.1}")
}
