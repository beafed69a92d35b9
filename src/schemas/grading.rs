use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::{format_offset, format_optional};
use crate::db::models::GradingRecord;
use crate::db::types::GradingStatus;
use crate::tasks::batch::RunningMean;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingCreate {
    #[serde(default)]
    #[validate(length(max = 64, message = "subject must be at most 64 characters"))]
    pub(crate) subject: Option<String>,
    #[serde(default)]
    pub(crate) images: Vec<String>,
    #[serde(default, alias = "paperImage")]
    pub(crate) paper_image_url: Option<String>,
    #[serde(default, alias = "answerImage")]
    pub(crate) answer_image_url: Option<String>,
    #[serde(default)]
    #[validate(length(max = 2000, message = "description must be at most 2000 characters"))]
    pub(crate) description: Option<String>,
}

impl GradingCreate {
    pub(crate) fn has_image(&self) -> bool {
        self.paper_image_url.as_deref().is_some_and(|value| !value.trim().is_empty())
            || self.images.iter().any(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingResponse {
    pub(crate) id: String,
    pub(crate) subject: String,
    pub(crate) images: Vec<String>,
    pub(crate) paper_image_url: Option<String>,
    pub(crate) answer_image_url: Option<String>,
    pub(crate) description: String,
    pub(crate) status: GradingStatus,
    pub(crate) score: i32,
    pub(crate) ai_score: i32,
    pub(crate) total_score: i32,
    pub(crate) ocr_result: Option<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) wrong_questions: Vec<String>,
    pub(crate) correct_answers: Vec<String>,
    pub(crate) needs_review: bool,
    pub(crate) submit_time: String,
    pub(crate) created_at: String,
    pub(crate) complete_time: String,
    pub(crate) owner_username: String,
    pub(crate) owner_role: String,
}

impl From<GradingRecord> for GradingResponse {
    fn from(record: GradingRecord) -> Self {
        Self {
            id: record.id,
            subject: record.subject,
            images: record.images.0,
            paper_image_url: record.paper_image,
            answer_image_url: record.answer_image,
            description: record.description,
            status: record.status,
            score: record.score,
            ai_score: record.ai_score,
            total_score: record.total_score,
            ocr_result: record.ocr_result,
            feedback: record.feedback,
            wrong_questions: record.wrong_questions.0,
            correct_answers: record.correct_answers.0,
            needs_review: record.needs_review,
            submit_time: format_offset(record.submit_time),
            created_at: format_offset(record.created_at),
            complete_time: format_optional(record.complete_time),
            owner_username: record.owner_username,
            owner_role: record.owner_role,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingListResponse {
    pub(crate) items: Vec<GradingResponse>,
    pub(crate) total: usize,
}

impl GradingListResponse {
    pub(crate) fn from_records(records: Vec<GradingRecord>) -> Self {
        let items: Vec<GradingResponse> = records.into_iter().map(GradingResponse::from).collect();
        Self { total: items.len(), items }
    }
}

/// Compact row for parent dashboards and history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingSummary {
    pub(crate) id: String,
    pub(crate) subject: String,
    pub(crate) status: GradingStatus,
    pub(crate) score: i32,
    pub(crate) total_score: i32,
    pub(crate) feedback: Option<String>,
    pub(crate) ocr_result: Option<String>,
    pub(crate) submit_time: String,
    pub(crate) complete_time: String,
}

impl From<GradingRecord> for GradingSummary {
    fn from(record: GradingRecord) -> Self {
        Self {
            id: record.id,
            subject: record.subject,
            status: record.status,
            score: record.score,
            total_score: record.total_score,
            feedback: record.feedback,
            ocr_result: record.ocr_result,
            submit_time: format_offset(record.submit_time),
            complete_time: format_optional(record.complete_time),
        }
    }
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmissionStatistics {
    pub(crate) total_submissions: usize,
    pub(crate) completed: usize,
    pub(crate) failed: usize,
    pub(crate) processing: usize,
    /// Mean over completed records only.
    pub(crate) average_score: f64,
}

impl SubmissionStatistics {
    pub(crate) fn from_records(records: &[GradingRecord]) -> Self {
        let mut stats = Self { total_submissions: records.len(), ..Self::default() };
        let mut scores = RunningMean::default();

        for record in records {
            match record.status {
                GradingStatus::Completed => {
                    stats.completed += 1;
                    scores.push(f64::from(record.score));
                }
                GradingStatus::Failed => stats.failed += 1,
                GradingStatus::Processing => stats.processing += 1,
            }
        }

        stats.average_score = scores.mean();
        stats
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParentDashboardResponse {
    pub(crate) recent_results: Vec<GradingSummary>,
    pub(crate) statistics: SubmissionStatistics,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParentHistoryResponse {
    pub(crate) history: Vec<GradingSummary>,
    pub(crate) statistics: SubmissionStatistics,
}
