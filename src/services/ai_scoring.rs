use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::{ScoringResponseMode, Settings};
use crate::services::error::ServiceError;
use crate::services::scoring_parse::{parse_structured, parse_unstructured, ParseOutcome};

const SERVICE: &str = "DeepSeek";

const STRUCTURED_PROMPT_TAIL: &str = r#"请按照以下JSON格式返回评分结果：
{
  "score": 85,
  "totalScore": 100,
  "wrongQuestions": ["第3题", "第7题"],
  "correctAnswers": ["第3题答案：C", "第7题答案：A"],
  "feedback": "整体表现良好，建议加强数学计算练习"
}

评分标准：
1. 内容准确性 (40分)
2. 逻辑完整性 (30分)
3. 表达清晰度 (20分)
4. 格式规范性 (10分)

请严格按照JSON格式返回，不要包含其他文字。"#;

#[derive(Debug, Clone)]
pub(crate) struct ScoringRequest {
    pub(crate) answer_text: String,
    pub(crate) reference_text: Option<String>,
    pub(crate) subject: String,
}

/// Turns extracted answer text into a score and feedback.
#[async_trait]
pub(crate) trait Scorer: Send + Sync {
    async fn score(&self, request: &ScoringRequest) -> Result<ParseOutcome, ServiceError>;
}

#[derive(Debug, Clone)]
pub(crate) struct AiScoringService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    mode: ScoringResponseMode,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl AiScoringService {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let ai = settings.ai();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(ai.request_timeout())
            .build()
            .map_err(|err| anyhow::anyhow!("Failed to build scoring HTTP client: {err}"))?;

        Ok(Self {
            client,
            api_key: ai.api_key.clone(),
            base_url: ai.base_url.clone(),
            model: ai.model.clone(),
            temperature: ai.temperature,
            mode: ai.response_mode,
        })
    }

    fn build_prompt(&self, request: &ScoringRequest) -> String {
        match self.mode {
            ScoringResponseMode::Structured => {
                let reference = request.reference_text.as_deref().unwrap_or("（未提供参考答案）");
                format!(
                    "你是一个专业的试卷批改助手。请根据以下OCR识别的学生答案和参考答案，进行评分和分析。\n\n\
                     科目：{}\n\n学生答案：\n{}\n\n参考答案：\n{}\n\n{}",
                    request.subject, request.answer_text, reference, STRUCTURED_PROMPT_TAIL
                )
            }
            ScoringResponseMode::Text => {
                let mut prompt = format!(
                    "你是一名阅卷老师，请根据学生答案给出0-100的分数并简要反馈。\n【科目】{}\n【学生答案】{}",
                    request.subject, request.answer_text
                );
                if let Some(reference) = request.reference_text.as_deref() {
                    prompt.push_str(&format!("\n【参考答案】{reference}"));
                }
                prompt.push_str("\n输出格式：分数（数字）+简短中文反馈。");
                prompt
            }
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        if self.api_key.is_empty() {
            return Err(ServiceError::Configuration("DeepSeek API key not configured"));
        }

        let body = CompletionRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ServiceError::transport(SERVICE, err))?;

        let status = response.status();
        let raw = response.text().await.map_err(|err| ServiceError::transport(SERVICE, err))?;
        let parsed: CompletionResponse = serde_json::from_str(&raw).map_err(|err| {
            ServiceError::protocol(SERVICE, format!("unparsable response ({status}): {err}"))
        })?;

        if let Some(error) = parsed.error {
            return Err(ServiceError::protocol(SERVICE, error.message));
        }
        if !status.is_success() {
            return Err(ServiceError::protocol(SERVICE, format!("request failed ({status})")));
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::protocol(SERVICE, "no choices in response"))
    }
}

#[async_trait]
impl Scorer for AiScoringService {
    async fn score(&self, request: &ScoringRequest) -> Result<ParseOutcome, ServiceError> {
        let prompt = self.build_prompt(request);
        let content = self.complete(&prompt).await?;

        Ok(match self.mode {
            ScoringResponseMode::Structured => parse_structured(&content),
            ScoringResponseMode::Text => parse_unstructured(content.trim()),
        })
    }
}
