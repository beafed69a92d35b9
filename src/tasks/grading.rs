use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use sqlx::types::Json;

use crate::core::time::now_utc;
use crate::db::models::GradingRecord;
use crate::db::types::GradingStatus;
use crate::repositories::gradings::GradingRepository;
use crate::services::ai_scoring::{Scorer, ScoringRequest};
use crate::services::baidu_ocr::TextExtractor;
use crate::services::scoring_parse::ParseOutcome;
use crate::services::storage::FileStore;

pub(crate) const AWAITING_FEEDBACK: &str = "已提交，等待AI评分...";
pub(crate) const RUN_ABORTED_FEEDBACK: &str = "评分过程异常中断，请重新提交";

const MIN_SCORE: i32 = 0;
const MAX_SCORE: i32 = 100;

/// Terminal result of one pipeline run, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed { score: i32, needs_review: bool },
    Failed { reason: String },
    Missing,
}

/// Drives one grading record through extraction, scoring and persistence.
#[derive(Clone)]
pub(crate) struct GradingPipeline {
    repo: Arc<dyn GradingRepository>,
    files: Arc<dyn FileStore>,
    extractor: Arc<dyn TextExtractor>,
    scorer: Arc<dyn Scorer>,
}

struct Graded {
    ocr_text: String,
    outcome: ParseOutcome,
}

impl GradingPipeline {
    pub(crate) fn new(
        repo: Arc<dyn GradingRepository>,
        files: Arc<dyn FileStore>,
        extractor: Arc<dyn TextExtractor>,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self { repo, files, extractor, scorer }
    }

    /// Only record-store failures are returned as errors; every stage
    /// failure ends up on the record as `failed`.
    pub(crate) async fn run(&self, grading_id: &str) -> anyhow::Result<RunOutcome> {
        let started = Instant::now();

        let Some(mut record) =
            self.repo.find_by_id(grading_id).await.context("Failed to load grading record")?
        else {
            tracing::warn!(grading_id, "Grading record not found, skipping run");
            return Ok(RunOutcome::Missing);
        };

        if record.status != GradingStatus::Processing {
            record.reset_for_run(AWAITING_FEEDBACK);
            self.repo.upsert(&record).await.context("Failed to mark grading as processing")?;
        }

        let outcome = match self.grade(&record).await {
            Ok(graded) => {
                apply_success(&mut record, graded);
                self.repo.upsert(&record).await.context("Failed to store grading result")?;

                tracing::info!(
                    grading_id,
                    subject = %record.subject,
                    score = record.score,
                    needs_review = record.needs_review,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Grading completed"
                );
                metrics::counter!("grading_jobs_total", "status" => "completed").increment(1);
                RunOutcome::Completed { score: record.score, needs_review: record.needs_review }
            }
            Err(reason) => {
                record.mark_failed(reason.clone());
                self.repo.upsert(&record).await.context("Failed to store grading failure")?;

                tracing::warn!(grading_id, reason = %reason, "Grading failed");
                metrics::counter!("grading_jobs_total", "status" => "failed").increment(1);
                RunOutcome::Failed { reason }
            }
        };

        metrics::histogram!("grading_duration_seconds").record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Fails a record whose run died before reaching a terminal state.
    pub(crate) async fn abort(&self, grading_id: &str, reason: &str) -> anyhow::Result<()> {
        let Some(mut record) =
            self.repo.find_by_id(grading_id).await.context("Failed to load grading record")?
        else {
            return Ok(());
        };
        if record.status != GradingStatus::Processing {
            return Ok(());
        }

        record.mark_failed(reason.to_string());
        self.repo.upsert(&record).await.context("Failed to store grading failure")?;
        metrics::counter!("grading_jobs_total", "status" => "failed").increment(1);

        Ok(())
    }

    async fn grade(&self, record: &GradingRecord) -> Result<Graded, String> {
        let paper_path = record.primary_image().ok_or_else(|| "未找到试卷图片路径".to_string())?;

        let paper = self
            .files
            .read(paper_path)
            .await
            .map_err(|err| format!("读取试卷图片失败: {err}"))?;
        tracing::debug!(grading_id = %record.id, stage = "ocr", bytes = paper.len(), "Extracting paper text");

        let ocr_text =
            self.extractor.extract_text(&paper).await.map_err(|err| format!("OCR 识别失败: {err}"))?;

        let reference_text = match record.answer_image.as_deref() {
            Some(answer_path) => {
                let answer = self
                    .files
                    .read(answer_path)
                    .await
                    .map_err(|err| format!("读取参考答案图片失败: {err}"))?;
                let text = self
                    .extractor
                    .extract_text(&answer)
                    .await
                    .map_err(|err| format!("参考答案 OCR 识别失败: {err}"))?;
                Some(text.trim().to_string())
            }
            None => None,
        };

        let request = ScoringRequest {
            answer_text: ocr_text.trim().to_string(),
            reference_text,
            subject: record.subject.clone(),
        };
        tracing::debug!(grading_id = %record.id, stage = "scoring", "Requesting score");

        let outcome =
            self.scorer.score(&request).await.map_err(|err| format!("AI 评分失败: {err}"))?;

        Ok(Graded { ocr_text: request.answer_text, outcome })
    }
}

fn apply_success(record: &mut GradingRecord, graded: Graded) {
    let needs_review = graded.outcome.needs_review();
    let score = graded.outcome.score().clamp(MIN_SCORE, MAX_SCORE);

    let (feedback, wrong_questions, correct_answers) = match graded.outcome {
        ParseOutcome::Structured(result) | ParseOutcome::Degraded(result) => {
            (result.feedback, result.wrong_questions, result.correct_answers)
        }
        ParseOutcome::Unstructured { feedback, .. } => (feedback, Vec::new(), Vec::new()),
    };

    record.status = GradingStatus::Completed;
    record.ai_score = score;
    record.score = score;
    record.ocr_result = Some(graded.ocr_text);
    record.feedback = Some(feedback);
    record.wrong_questions = Json(wrong_questions);
    record.correct_answers = Json(correct_answers);
    record.needs_review = needs_review;
    record.complete_time = Some(now_utc());
}
