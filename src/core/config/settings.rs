use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, is_supported_image_extension, parse_bool, parse_cors_origins,
    parse_environment, parse_f64, parse_scoring_mode, parse_string_list, parse_u32,
    parse_u64, parse_usize,
};
use super::types::{
    AiSettings, ApiSettings, BatchSettings, ConfigError, CorsSettings, DatabaseSettings,
    OcrSettings, PipelineSettings, RuntimeSettings, ServerHost, ServerPort, ServerSettings,
    Settings, StorageSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("AUTOGRADE_HOST", "0.0.0.0");
        let port = env_or_default("AUTOGRADE_PORT", "3000");

        let environment = parse_environment(
            env_optional("AUTOGRADE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );

        let project_name = env_or_default("PROJECT_NAME", "Autograde API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_prefix = env_or_default("API_PREFIX", "/api");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DATABASE_MAX_CONNECTIONS", env_or_default("DATABASE_MAX_CONNECTIONS", "10"))?;

        let upload_path = PathBuf::from(env_or_default("UPLOAD_PATH", "./uploads"));
        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "10"))?;
        let allowed_image_extensions = parse_string_list(
            env_optional("ALLOWED_IMAGE_EXTENSIONS"),
            &["jpg", "jpeg", "png", "bmp", "webp"],
        );

        let ocr_api_key = env_or_default("BAIDU_API_KEY", "");
        let ocr_secret_key = env_or_default("BAIDU_SECRET_KEY", "");
        let ocr_base_url = env_or_default("BAIDU_OCR_BASE_URL", "https://aip.baidubce.com");
        let ocr_endpoint = env_or_default("BAIDU_OCR_ENDPOINT", "accurate_basic");
        let ocr_language_type = env_or_default("OCR_LANGUAGE_TYPE", "CHN_ENG");
        let ocr_request_timeout =
            parse_u64("OCR_REQUEST_TIMEOUT", env_or_default("OCR_REQUEST_TIMEOUT", "30"))?;

        let ai_api_key = env_or_default("DEEPSEEK_API_KEY", "");
        let ai_base_url = env_or_default("DEEPSEEK_BASE_URL", "https://api.deepseek.com");
        let ai_model = env_or_default("AI_MODEL", "deepseek-chat");
        let ai_temperature = parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0.1"))?;
        let ai_request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "60"))?;
        let response_mode =
            parse_scoring_mode(env_or_default("SCORING_RESPONSE_MODE", "structured"))?;

        let workers = parse_usize("GRADING_WORKERS", env_or_default("GRADING_WORKERS", "4"))?;
        let queue_capacity = parse_usize(
            "GRADING_QUEUE_CAPACITY",
            env_or_default("GRADING_QUEUE_CAPACITY", "256"),
        )?;

        let item_delay_ms =
            parse_u64("BATCH_ITEM_DELAY_MS", env_or_default("BATCH_ITEM_DELAY_MS", "2000"))?;
        let message_every =
            parse_u32("BATCH_MESSAGE_EVERY", env_or_default("BATCH_MESSAGE_EVERY", "10"))?;

        let log_level = env_or_default("AUTOGRADE_LOG_LEVEL", "info");
        let json = env_optional("AUTOGRADE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment },
            api: ApiSettings { project_name, version, api_prefix },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings { database_url, max_connections },
            storage: StorageSettings { upload_path, max_upload_size_mb, allowed_image_extensions },
            ocr: OcrSettings {
                api_key: ocr_api_key,
                secret_key: ocr_secret_key,
                base_url: ocr_base_url.trim_end_matches('/').to_string(),
                endpoint: ocr_endpoint,
                language_type: ocr_language_type,
                request_timeout_seconds: ocr_request_timeout,
            },
            ai: AiSettings {
                api_key: ai_api_key,
                base_url: ai_base_url.trim_end_matches('/').to_string(),
                model: ai_model,
                temperature: ai_temperature,
                request_timeout_seconds: ai_request_timeout,
                response_mode,
            },
            pipeline: PipelineSettings { workers, queue_capacity },
            batch: BatchSettings { item_delay_ms, message_every },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }

    pub(crate) fn batch(&self) -> &BatchSettings {
        &self.batch
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    // OCR/AI credentials are not required here; a missing key fails each grading run instead.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.allowed_image_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_IMAGE_EXTENSIONS",
                value: String::from("<empty>"),
            });
        }
        for extension in &self.storage.allowed_image_extensions {
            if !is_supported_image_extension(extension) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_IMAGE_EXTENSIONS",
                    value: extension.clone(),
                });
            }
        }

        if self.pipeline.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_WORKERS",
                value: String::from("0"),
            });
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_QUEUE_CAPACITY",
                value: String::from("0"),
            });
        }

        if self.batch.message_every == 0 {
            return Err(ConfigError::InvalidValue {
                field: "BATCH_MESSAGE_EVERY",
                value: String::from("0"),
            });
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "AI_TEMPERATURE",
                value: self.ai.temperature.to_string(),
            });
        }

        Ok(())
    }
}
