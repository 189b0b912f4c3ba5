/// 程序配置
///
/// 所有参数都有默认值，可通过环境变量覆盖（`main` 启动时会先加载 `.env`）。
/// 环境变量值格式错误时返回 `ConfigError`，不会静默回退到默认值。
use crate::error::ConfigError;
use crate::models::EnrichmentSchema;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 输出序列化格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Toml,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Toml => "toml",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "toml" => Ok(OutputFormat::Toml),
            other => Err(format!("不支持的输出格式: {}", other)),
        }
    }
}

/// HTTP 状态码 → 错误类型的映射
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPolicy {
    /// 可重试的服务端状态码
    pub transient: Vec<u16>,
    /// 视为文档不存在的状态码
    pub not_found: Vec<u16>,
    /// 视为限流的状态码
    pub rate_limited: Vec<u16>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            transient: vec![408, 500, 502, 503, 504],
            not_found: vec![404, 410],
            rate_limited: vec![429],
        }
    }
}

/// LLM 错误信息 → 错误类型的映射（按整词匹配关键字，忽略大小写）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceErrorPolicy {
    pub quota_markers: Vec<String>,
    pub unavailable_markers: Vec<String>,
    /// 配额耗尽时的建议等待时间
    pub quota_backoff: Duration,
}

impl Default for ServiceErrorPolicy {
    fn default() -> Self {
        Self {
            quota_markers: to_strings(&["insufficient_quota", "rate_limit", "429", "quota"]),
            unavailable_markers: to_strings(&[
                "server_error",
                "overloaded",
                "unavailable",
                "500",
                "502",
                "503",
                "504",
                "timeout",
                "timed out",
                "connection",
            ]),
            quota_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    // --- 批处理 ---
    /// 同时执行的条目数
    pub max_workers: usize,
    /// 首次失败后的最大重试次数
    pub max_retries: u32,
    /// 单次尝试超时
    pub attempt_timeout: Duration,
    /// 指数退避的初始间隔
    pub backoff_base: Duration,
    /// 指数退避的上限
    pub backoff_max: Duration,
    /// 服务端建议等待时间（Retry-After、配额退避）的上限
    pub retry_hint_max: Duration,
    /// 已有输出时是否仍然重新处理
    pub force_reprocess: bool,

    // --- 输出 ---
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,

    // --- 获取 ---
    pub http_timeout: Duration,
    pub user_agent: String,
    pub patent_base_url: String,
    pub status_policy: StatusPolicy,

    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub service_error_policy: ServiceErrorPolicy,
    pub enrichment_schema: EnrichmentSchema,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_retries: 3,
            attempt_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            retry_hint_max: Duration::from_secs(300),
            force_reprocess: false,
            output_dir: PathBuf::from("output"),
            output_format: OutputFormat::Json,
            http_timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            patent_base_url: "https://patents.google.com/patent/".to_string(),
            status_policy: StatusPolicy::default(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            service_error_policy: ServiceErrorPolicy::default(),
            enrichment_schema: EnrichmentSchema::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源构建配置（测试时不必修改进程环境变量）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let env = Env { lookup: &lookup };

        let config = Self {
            max_workers: env.parse("MAX_WORKERS", "usize")?.unwrap_or(d.max_workers),
            max_retries: env.parse("MAX_RETRIES", "u32")?.unwrap_or(d.max_retries),
            attempt_timeout: env
                .parse("ATTEMPT_TIMEOUT_SECS", "u64")?
                .map(Duration::from_secs)
                .unwrap_or(d.attempt_timeout),
            backoff_base: env
                .parse("BACKOFF_BASE_MS", "u64")?
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_base),
            backoff_max: env
                .parse("BACKOFF_MAX_MS", "u64")?
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_max),
            retry_hint_max: env
                .parse("RETRY_HINT_MAX_SECS", "u64")?
                .map(Duration::from_secs)
                .unwrap_or(d.retry_hint_max),
            force_reprocess: env.parse("FORCE_REPROCESS", "bool")?.unwrap_or(d.force_reprocess),
            output_dir: env.string("OUTPUT_DIR").map(PathBuf::from).unwrap_or(d.output_dir),
            output_format: env
                .parse("OUTPUT_FORMAT", "json|toml")?
                .unwrap_or(d.output_format),
            http_timeout: env
                .parse("HTTP_TIMEOUT_SECS", "u64")?
                .map(Duration::from_secs)
                .unwrap_or(d.http_timeout),
            user_agent: env.string("HTTP_USER_AGENT").unwrap_or(d.user_agent),
            patent_base_url: env.string("PATENT_BASE_URL").unwrap_or(d.patent_base_url),
            status_policy: StatusPolicy {
                transient: env
                    .list("TRANSIENT_STATUS_CODES", "u16 列表")?
                    .unwrap_or(d.status_policy.transient),
                not_found: env
                    .list("NOT_FOUND_STATUS_CODES", "u16 列表")?
                    .unwrap_or(d.status_policy.not_found),
                rate_limited: env
                    .list("RATE_LIMIT_STATUS_CODES", "u16 列表")?
                    .unwrap_or(d.status_policy.rate_limited),
            },
            llm_api_key: env.string("LLM_API_KEY").unwrap_or(d.llm_api_key),
            llm_api_base_url: env.string("LLM_API_BASE_URL").unwrap_or(d.llm_api_base_url),
            llm_model_name: env.string("LLM_MODEL_NAME").unwrap_or(d.llm_model_name),
            service_error_policy: ServiceErrorPolicy {
                quota_markers: env
                    .list("LLM_QUOTA_MARKERS", "字符串列表")?
                    .unwrap_or(d.service_error_policy.quota_markers),
                unavailable_markers: env
                    .list("LLM_UNAVAILABLE_MARKERS", "字符串列表")?
                    .unwrap_or(d.service_error_policy.unavailable_markers),
                quota_backoff: env
                    .parse("QUOTA_BACKOFF_SECS", "u64")?
                    .map(Duration::from_secs)
                    .unwrap_or(d.service_error_policy.quota_backoff),
            },
            enrichment_schema: EnrichmentSchema {
                summary_max_words: env
                    .parse("SUMMARY_MAX_WORDS", "usize")?
                    .unwrap_or(d.enrichment_schema.summary_max_words),
                max_key_points: env
                    .parse("MAX_KEY_POINTS", "usize")?
                    .unwrap_or(d.enrichment_schema.max_key_points),
                taxonomy: env
                    .list("CATEGORY_TAXONOMY", "字符串列表")?
                    .unwrap_or(d.enrichment_schema.taxonomy),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// 检查配置取值是否合法
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(invalid("max_workers", "必须大于 0"));
        }
        if self.attempt_timeout.is_zero() {
            return Err(invalid("attempt_timeout", "必须大于 0"));
        }
        if self.backoff_max < self.backoff_base {
            return Err(invalid("backoff_max", "不能小于 backoff_base"));
        }
        if self.enrichment_schema.max_key_points == 0 {
            return Err(invalid("max_key_points", "必须大于 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// 环境变量读取辅助
struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, expected: &str) -> Result<Option<T>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::EnvVarParseFailed {
                    var_name: key.to_string(),
                    value,
                    expected_type: expected.to_string(),
                }),
        }
    }

    /// 逗号分隔的列表
    fn list<T: FromStr>(&self, key: &str, expected: &str) -> Result<Option<Vec<T>>, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(None);
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().map_err(|_| ConfigError::EnvVarParseFailed {
                    var_name: key.to_string(),
                    value: value.clone(),
                    expected_type: expected.to_string(),
                })
            })
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.status_policy, StatusPolicy::default());
        assert_eq!(config.retry_hint_max, Duration::from_secs(300));
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("MAX_WORKERS", "4"),
            ("MAX_RETRIES", "0"),
            ("OUTPUT_FORMAT", "TOML"),
            ("TRANSIENT_STATUS_CODES", "500, 503"),
            ("CATEGORY_TAXONOMY", "Software,Medical Devices"),
            ("FORCE_REPROCESS", "true"),
            ("RETRY_HINT_MAX_SECS", "90"),
        ])
        .unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.output_format, OutputFormat::Toml);
        assert_eq!(config.status_policy.transient, vec![500, 503]);
        assert_eq!(
            config.enrichment_schema.taxonomy,
            vec!["Software".to_string(), "Medical Devices".to_string()]
        );
        assert!(config.force_reprocess);
        assert_eq!(config.retry_hint_max, Duration::from_secs(90));
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let err = config_from(&[("MAX_WORKERS", "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarParseFailed { ref var_name, .. } if var_name == "MAX_WORKERS"
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = config_from(&[("MAX_WORKERS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
