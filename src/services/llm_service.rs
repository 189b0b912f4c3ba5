//! LLM 服务 - 业务能力层
//!
//! 只负责"调用标注模型"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）
//!
//! ## 错误分类
//!
//! 先看 API 错误自带的 `code` / `type`，认不出来再按 `ServiceErrorPolicy` 中的关键字归类：
//! 配额类 → `QuotaExceeded`（带长退避），不可用类 → `ServiceUnavailable`，
//! 其余 → `Rejected`（不重试）。关键字必须是完整的词，`500` 不会命中 `15003`。

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{Config, ServiceErrorPolicy};
use crate::error::EnrichmentError;

/// 外部标注服务
///
/// Enricher 只依赖这个 trait，测试里可以换成固定响应的实现。
#[async_trait]
pub trait AnnotationService: Send + Sync {
    /// 写进 `EnrichmentResult.model` 的模型名
    fn model_name(&self) -> &str;

    /// 发送一次请求，返回模型的原始文本响应（单次尝试，不重试）
    async fn complete(&self, system: &str, user: &str) -> Result<String, EnrichmentError>;
}

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API 生成标注
/// - 只处理单条记录
/// - 不关心批处理和重试
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    error_policy: ServiceErrorPolicy,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            error_policy: config.service_error_policy.clone(),
        }
    }

    fn classify(&self, error: OpenAIError) -> EnrichmentError {
        match &error {
            OpenAIError::ApiError(api) => classify_api_error(
                api.code.as_deref(),
                api.r#type.as_deref(),
                &format!("{} (type: {:?}, code: {:?})", api.message, api.r#type, api.code),
                &self.error_policy,
            ),
            other => classify_service_error(&other.to_string(), &self.error_policy),
        }
    }
}

#[async_trait]
impl AnnotationService for LlmService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, EnrichmentError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user.len());

        let build_failed = |e: OpenAIError| EnrichmentError::Rejected {
            message: format!("构建请求失败: {}", e),
        };

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(build_failed)?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(build_failed)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.2)
            .max_tokens(1024u32)
            .build()
            .map_err(build_failed)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.classify(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| EnrichmentError::shape("LLM 返回内容为空"))?;

        Ok(content)
    }
}

/// 按 API 错误的 `code` / `type` 归类，两者都认不出来时退回关键字匹配
pub fn classify_api_error(
    code: Option<&str>,
    kind: Option<&str>,
    message: &str,
    policy: &ServiceErrorPolicy,
) -> EnrichmentError {
    let known = [code, kind]
        .into_iter()
        .flatten()
        .find_map(|tag| match tag.to_ascii_lowercase().as_str() {
            "insufficient_quota" | "rate_limit_exceeded" | "rate_limit_error" => {
                Some(ServiceErrorClass::Quota)
            }
            "server_error" | "overloaded" | "overloaded_error" | "service_unavailable" => {
                Some(ServiceErrorClass::Unavailable)
            }
            "invalid_request_error"
            | "context_length_exceeded"
            | "invalid_api_key"
            | "authentication_error"
            | "permission_error"
            | "model_not_found" => Some(ServiceErrorClass::Rejected),
            _ => None,
        });

    match known {
        Some(class) => class.into_error(message, policy),
        None => classify_service_error(message, policy),
    }
}

/// 按关键字把服务端错误信息归类（忽略大小写，配额优先）
///
/// 关键字按整词匹配：前后不能紧挨着字母或数字（`_` 算分隔符）。
pub fn classify_service_error(message: &str, policy: &ServiceErrorPolicy) -> EnrichmentError {
    let lower = message.to_lowercase();
    let hit = |markers: &[String]| {
        markers
            .iter()
            .any(|m| contains_word(&lower, &m.to_lowercase()))
    };

    let class = if hit(&policy.quota_markers) {
        ServiceErrorClass::Quota
    } else if hit(&policy.unavailable_markers) {
        ServiceErrorClass::Unavailable
    } else {
        ServiceErrorClass::Rejected
    };
    class.into_error(message, policy)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceErrorClass {
    Quota,
    Unavailable,
    Rejected,
}

impl ServiceErrorClass {
    fn into_error(self, message: &str, policy: &ServiceErrorPolicy) -> EnrichmentError {
        let message = message.to_string();
        match self {
            ServiceErrorClass::Quota => EnrichmentError::QuotaExceeded {
                message,
                retry_after: Some(policy.quota_backoff),
            },
            ServiceErrorClass::Unavailable => EnrichmentError::ServiceUnavailable { message },
            ServiceErrorClass::Rejected => EnrichmentError::Rejected { message },
        }
    }
}

fn contains_word(text: &str, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    text.match_indices(marker).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + marker.len()..].chars().next();
        let boundary = |c: Option<char>| !c.is_some_and(char::is_alphanumeric);
        boundary(before) && boundary(after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classify_quota() {
        let policy = ServiceErrorPolicy::default();
        let err = classify_service_error("You exceeded your current quota (insufficient_quota)", &policy);
        assert_eq!(
            err,
            EnrichmentError::QuotaExceeded {
                message: "You exceeded your current quota (insufficient_quota)".to_string(),
                retry_after: Some(Duration::from_secs(60)),
            }
        );
    }

    #[test]
    fn test_classify_unavailable_and_rejected() {
        let policy = ServiceErrorPolicy::default();
        assert!(matches!(
            classify_service_error("The server is OVERLOADED", &policy),
            EnrichmentError::ServiceUnavailable { .. }
        ));
        assert!(matches!(
            classify_service_error("invalid api key", &policy),
            EnrichmentError::Rejected { .. }
        ));
    }

    #[test]
    fn test_classify_uses_configured_markers() {
        let policy = ServiceErrorPolicy {
            quota_markers: vec![],
            unavailable_markers: vec!["try again later".to_string()],
            quota_backoff: Duration::from_secs(1),
        };
        assert!(matches!(
            classify_service_error("quota exceeded, try again later", &policy),
            EnrichmentError::ServiceUnavailable { .. }
        ));
    }

    #[test]
    fn test_service_builds_from_config() {
        let service = LlmService::new(&Config::default());
        assert_eq!(service.model_name(), Config::default().llm_model_name);
    }

    #[test]
    fn test_numbers_inside_a_message_do_not_match_status_markers() {
        let policy = ServiceErrorPolicy::default();
        let message = "This model's maximum context length is 8192 tokens. However, your messages \
                       resulted in 15003 tokens. (type: Some(\"invalid_request_error\"), \
                       code: Some(\"context_length_exceeded\"))";
        assert!(matches!(
            classify_service_error(message, &policy),
            EnrichmentError::Rejected { .. }
        ));
        assert!(matches!(
            classify_service_error("upstream returned HTTP 503", &policy),
            EnrichmentError::ServiceUnavailable { .. }
        ));
        assert!(matches!(
            classify_service_error("rate_limit_exceeded for org", &policy),
            EnrichmentError::QuotaExceeded { .. }
        ));
    }

    #[test]
    fn test_api_code_wins_over_message_markers() {
        let policy = ServiceErrorPolicy::default();
        let rejected = classify_api_error(
            Some("context_length_exceeded"),
            Some("invalid_request_error"),
            "request too large, retry after 503 ms",
            &policy,
        );
        assert!(matches!(rejected, EnrichmentError::Rejected { .. }));

        let quota = classify_api_error(None, Some("insufficient_quota"), "billing", &policy);
        assert!(matches!(
            quota,
            EnrichmentError::QuotaExceeded { retry_after: Some(d), .. } if d == Duration::from_secs(60)
        ));

        // 不认识的 code 退回关键字匹配
        let unknown = classify_api_error(Some("weird"), None, "server overloaded", &policy);
        assert!(matches!(unknown, EnrichmentError::ServiceUnavailable { .. }));
    }
}
