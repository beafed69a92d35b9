use serde::{Deserialize, Serialize};

pub(crate) const PLACEHOLDER_SCORE: i32 = 75;
pub(crate) const PLACEHOLDER_FEEDBACK: &str = "AI解析失败，请手动批改";
const PLACEHOLDER_WRONG: &str = "解析失败";
const PLACEHOLDER_CORRECT: &str = "请手动检查";
const MAX_SCORE: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct GradingResult {
    pub(crate) score: i32,
    pub(crate) total_score: i32,
    pub(crate) wrong_questions: Vec<String>,
    pub(crate) correct_answers: Vec<String>,
    pub(crate) feedback: String,
}

impl Default for GradingResult {
    fn default() -> Self {
        Self {
            score: 0,
            total_score: MAX_SCORE,
            wrong_questions: Vec::new(),
            correct_answers: Vec::new(),
            feedback: String::new(),
        }
    }
}

impl GradingResult {
    fn placeholder() -> Self {
        Self {
            score: PLACEHOLDER_SCORE,
            total_score: MAX_SCORE,
            wrong_questions: vec![PLACEHOLDER_WRONG.to_string()],
            correct_answers: vec![PLACEHOLDER_CORRECT.to_string()],
            feedback: PLACEHOLDER_FEEDBACK.to_string(),
        }
    }
}

/// How a scoring completion was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParseOutcome {
    /// Completion matched the JSON contract.
    Structured(GradingResult),
    /// Number-led free text; `score` is the first digit run, 0 when absent.
    Unstructured { score: i32, feedback: String },
    /// Completion was unusable; carries the placeholder routed to manual review.
    Degraded(GradingResult),
}

impl ParseOutcome {
    pub(crate) fn score(&self) -> i32 {
        match self {
            Self::Structured(result) | Self::Degraded(result) => result.score,
            Self::Unstructured { score, .. } => *score,
        }
    }

    pub(crate) fn needs_review(&self) -> bool {
        match self {
            Self::Structured(_) => false,
            Self::Unstructured { feedback, .. } => first_digit_run(feedback).is_none(),
            Self::Degraded(_) => true,
        }
    }
}

pub(crate) fn parse_structured(content: &str) -> ParseOutcome {
    match serde_json::from_str::<GradingResult>(strip_code_fence(content)) {
        Ok(result) => ParseOutcome::Structured(result),
        Err(err) => {
            tracing::warn!(error = %err, "Scoring completion is not valid JSON, using placeholder");
            ParseOutcome::Degraded(GradingResult::placeholder())
        }
    }
}

pub(crate) fn parse_unstructured(content: &str) -> ParseOutcome {
    ParseOutcome::Unstructured {
        score: extract_first_number(content),
        feedback: content.to_string(),
    }
}

/// First maximal run of ASCII digits anywhere in `text`, or 0.
pub(crate) fn extract_first_number(text: &str) -> i32 {
    let Some(run) = first_digit_run(text) else {
        return 0;
    };

    run.bytes().fold(0i32, |acc, digit| {
        acc.saturating_mul(10).saturating_add(i32::from(digit - b'0'))
    })
}

fn first_digit_run(text: &str) -> Option<&str> {
    let start = text.find(|ch: char| ch.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
