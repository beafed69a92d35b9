use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::core::config::Settings;
use crate::services::error::ServiceError;

const SERVICE: &str = "Baidu OCR";
const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// Turns image bytes into recognized text.
#[async_trait]
pub(crate) trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ServiceError>;
}

#[derive(Debug)]
pub(crate) struct BaiduOcrService {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    endpoint: String,
    language_type: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.checked_duration_since(now).is_some_and(|left| left > TOKEN_SAFETY_MARGIN)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    #[serde(default)]
    words_result: Vec<WordsItem>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WordsItem {
    words: String,
}

impl BaiduOcrService {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let ocr = settings.ocr();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(ocr.request_timeout())
            .build()
            .map_err(|err| anyhow::anyhow!("Failed to build OCR HTTP client: {err}"))?;

        Ok(Self {
            client,
            api_key: ocr.api_key.clone(),
            secret_key: ocr.secret_key.clone(),
            base_url: ocr.base_url.clone(),
            endpoint: ocr.endpoint.clone(),
            language_type: ocr.language_type.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(ServiceError::Configuration("Baidu OCR credentials not configured"));
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let response = self
            .client
            .get(format!("{}/oauth/2.0/token", self.base_url))
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.secret_key.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ServiceError::transport(SERVICE, err))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| ServiceError::transport(SERVICE, err))?;
        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|err| {
            ServiceError::protocol(SERVICE, format!("unparsable token response ({status}): {err}"))
        })?;

        if let Some(error) = parsed.error {
            let detail = parsed.error_description.unwrap_or_default();
            return Err(ServiceError::protocol(SERVICE, format!("{error} {detail}").trim().to_string()));
        }
        if !status.is_success() {
            return Err(ServiceError::protocol(SERVICE, format!("token request failed ({status})")));
        }

        let Some(value) = parsed.access_token.filter(|token| !token.is_empty()) else {
            return Err(ServiceError::protocol(SERVICE, "token response missing access_token"));
        };

        let expires_in = Duration::from_secs(parsed.expires_in.unwrap_or(0));
        *cached = Some(CachedToken { value: value.clone(), expires_at: Instant::now() + expires_in });
        metrics::counter!("ocr_token_refresh_total").increment(1);
        tracing::debug!(expires_in_secs = expires_in.as_secs(), "OCR access token refreshed");

        Ok(value)
    }
}

#[async_trait]
impl TextExtractor for BaiduOcrService {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ServiceError> {
        let token = self.access_token().await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let response = self
            .client
            .post(format!("{}/rest/2.0/ocr/v1/{}", self.base_url, self.endpoint))
            .query(&[("access_token", token.as_str())])
            .form(&[("image", encoded.as_str()), ("language_type", self.language_type.as_str())])
            .send()
            .await
            .map_err(|err| ServiceError::transport(SERVICE, err))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| ServiceError::transport(SERVICE, err))?;
        let parsed: RecognitionResponse = serde_json::from_str(&body).map_err(|err| {
            ServiceError::protocol(SERVICE, format!("unparsable recognition response ({status}): {err}"))
        })?;

        if let Some(code) = parsed.error_code.filter(|code| *code != 0) {
            let message = parsed.error_msg.unwrap_or_default();
            return Err(ServiceError::protocol(SERVICE, format!("{code} - {message}")));
        }
        if !status.is_success() {
            return Err(ServiceError::protocol(SERVICE, format!("recognition failed ({status})")));
        }
        if parsed.words_result.is_empty() {
            return Err(ServiceError::NothingRecognized);
        }

        let text = parsed
            .words_result
            .into_iter()
            .map(|item| item.words)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(text)
    }
}
