use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::db::types::GradingStatus;

pub(crate) const DEFAULT_SUBJECT: &str = "未指定科目";
pub(crate) const DEFAULT_TOTAL_SCORE: i32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradingRecord {
    pub(crate) id: String,
    pub(crate) subject: String,
    pub(crate) images: Json<Vec<String>>,
    pub(crate) paper_image: Option<String>,
    pub(crate) answer_image: Option<String>,
    pub(crate) description: String,
    pub(crate) status: GradingStatus,
    pub(crate) score: i32,
    pub(crate) ai_score: i32,
    pub(crate) total_score: i32,
    pub(crate) ocr_result: Option<String>,
    pub(crate) feedback: Option<String>,
    pub(crate) wrong_questions: Json<Vec<String>>,
    pub(crate) correct_answers: Json<Vec<String>>,
    pub(crate) needs_review: bool,
    pub(crate) submit_time: OffsetDateTime,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) complete_time: Option<OffsetDateTime>,
    pub(crate) owner_username: String,
    pub(crate) owner_role: String,
}

pub(crate) struct NewGrading {
    pub(crate) id: String,
    pub(crate) subject: Option<String>,
    pub(crate) images: Vec<String>,
    pub(crate) paper_image: Option<String>,
    pub(crate) answer_image: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) owner_username: String,
    pub(crate) owner_role: String,
    pub(crate) now: OffsetDateTime,
}

impl GradingRecord {
    /// Fresh record in `processing`, ready to be handed to the pipeline.
    pub(crate) fn new(params: NewGrading) -> Self {
        let subject = params
            .subject
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let paper_image = params
            .paper_image
            .filter(|value| !value.trim().is_empty())
            .or_else(|| params.images.first().cloned());

        Self {
            id: params.id,
            subject,
            images: Json(params.images),
            paper_image,
            answer_image: params.answer_image.filter(|value| !value.trim().is_empty()),
            description: params.description.unwrap_or_default(),
            status: GradingStatus::Processing,
            score: 0,
            ai_score: 0,
            total_score: DEFAULT_TOTAL_SCORE,
            ocr_result: None,
            feedback: None,
            wrong_questions: Json(Vec::new()),
            correct_answers: Json(Vec::new()),
            needs_review: false,
            submit_time: params.now,
            created_at: params.now,
            complete_time: None,
            owner_username: params.owner_username,
            owner_role: params.owner_role,
        }
    }

    /// Clears the outcome of any previous run.
    pub(crate) fn reset_for_run(&mut self, feedback: &str) {
        self.status = GradingStatus::Processing;
        self.score = 0;
        self.ai_score = 0;
        self.ocr_result = None;
        self.feedback = Some(feedback.to_string());
        self.wrong_questions = Json(Vec::new());
        self.correct_answers = Json(Vec::new());
        self.needs_review = false;
        self.complete_time = None;
    }

    pub(crate) fn mark_failed(&mut self, message: String) {
        self.status = GradingStatus::Failed;
        self.score = 0;
        self.ai_score = 0;
        self.ocr_result = None;
        self.feedback = Some(message);
        self.complete_time = None;
    }

    /// Image the pipeline extracts from: `paper_image`, else the first upload.
    pub(crate) fn primary_image(&self) -> Option<&str> {
        self.paper_image
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.images.0.first().map(String::as_str))
            .filter(|value| !value.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::now_utc;

    fn new_params(images: Vec<String>, paper_image: Option<String>) -> NewGrading {
        NewGrading {
            id: "g-1".to_string(),
            subject: None,
            images,
            paper_image,
            answer_image: Some("  ".to_string()),
            description: None,
            owner_username: "alice".to_string(),
            owner_role: "parent".to_string(),
            now: now_utc(),
        }
    }

    #[test]
    fn new_record_applies_defaults() {
        let record = GradingRecord::new(new_params(vec!["papers/a.png".to_string()], None));

        assert_eq!(record.subject, DEFAULT_SUBJECT);
        assert_eq!(record.status, GradingStatus::Processing);
        assert_eq!(record.total_score, 100);
        assert_eq!(record.paper_image.as_deref(), Some("papers/a.png"));
        assert!(record.answer_image.is_none());
        assert!(record.complete_time.is_none());
    }

    #[test]
    fn primary_image_prefers_paper_image() {
        let record = GradingRecord::new(new_params(
            vec!["papers/a.png".to_string()],
            Some("papers/b.png".to_string()),
        ));
        assert_eq!(record.primary_image(), Some("papers/b.png"));

        let empty = GradingRecord::new(new_params(Vec::new(), None));
        assert_eq!(empty.primary_image(), None);
    }

    #[test]
    fn mark_failed_zeroes_scores() {
        let mut record = GradingRecord::new(new_params(vec!["papers/a.png".to_string()], None));
        record.score = 88;
        record.ai_score = 88;
        record.ocr_result = Some("text".to_string());

        record.mark_failed("OCR 识别失败".to_string());

        assert_eq!(record.status, GradingStatus::Failed);
        assert_eq!(record.score, 0);
        assert_eq!(record.ai_score, 0);
        assert!(record.ocr_result.is_none());
        assert_eq!(record.feedback.as_deref(), Some("OCR 识别失败"));
    }
}
