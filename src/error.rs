//! 错误类型
//!
//! ## 分类
//!
//! 所有阶段错误（Fetcher / Extractor / Enricher / 输出写入）都必须归入下面两类之一：
//!
//! - **Transient（可重试）**：网络超时、请求频率限制、服务不可用、单次尝试超时
//! - **Permanent（不可重试）**：标识符非法、文档缺少必填字段、权利要求结构错误、响应结构不符
//!
//! 无法识别的错误一律按 Permanent 处理（快速失败，不无限重试）。
//!
//! ## 层次
//!
//! ```text
//! FetchError / ParseError / EnrichmentError / OutputError   (能力层)
//!     ↓ From
//! ErrorKind                                                  (编排层看到的单一错误类型)
//!     ↓ class()
//! ErrorClass::{Transient, Permanent}
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// 错误分类：决定编排层是否重试
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 重试可能成功
    Transient,
    /// 重试同样的输入不会改变结果
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// 获取文档失败
///
/// Fetcher 每次调用只尝试一次，重试由编排层负责。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// 文档不存在（404 / 本地文件不存在）
    #[error("文档不存在: {identifier}")]
    NotFound { identifier: String },

    /// 网络超时或连接中断
    #[error("网络超时或连接失败 ({identifier}): {message}")]
    NetworkTimeout { identifier: String, message: String },

    /// 请求频率限制，可能携带服务端建议的等待时间
    #[error("请求频率限制 ({identifier}), 建议等待: {retry_after:?}")]
    RateLimited {
        identifier: String,
        retry_after: Option<Duration>,
    },

    /// 标识符既不是专利号、URL，也不是本地文件路径
    #[error("非法的标识符 ({identifier}): {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// 服务端临时错误（状态码在可重试列表中）
    #[error("服务端临时错误 ({identifier}): HTTP {status}")]
    ServerError { identifier: String, status: u16 },

    /// 未列入任何分类的状态码
    #[error("意外的响应状态 ({identifier}): HTTP {status}")]
    UnexpectedStatus { identifier: String, status: u16 },

    /// 本地文件或网络响应无法读取（重试也不会变）
    #[error("读取失败 ({path}): {message}")]
    ReadFailed { path: String, message: String },
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::NetworkTimeout { .. }
            | FetchError::RateLimited { .. }
            | FetchError::ServerError { .. } => ErrorClass::Transient,
            FetchError::NotFound { .. }
            | FetchError::InvalidIdentifier { .. }
            | FetchError::UnexpectedStatus { .. }
            | FetchError::ReadFailed { .. } => ErrorClass::Permanent,
        }
    }

    pub fn invalid_identifier(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}

/// 解析文档失败
///
/// Extractor 是纯函数，所以这里的错误全部是 Permanent。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// 文档缺少必填字段
    #[error("缺少必填字段: {field}")]
    MissingRequiredField { field: String },

    /// 从属权利要求引用了自身或更靠后的权利要求
    #[error("权利要求结构错误 (权利要求 {claim} → {depends_on}): {reason}")]
    MalformedClaimStructure {
        claim: u32,
        depends_on: u32,
        reason: String,
    },

    /// 内容不是可识别的专利 HTML
    #[error("不支持的文档格式: {reason}")]
    UnsupportedDocumentFormat { reason: String },
}

impl ParseError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }

    pub fn missing(field: impl Into<String>) -> Self {
        ParseError::MissingRequiredField {
            field: field.into(),
        }
    }
}

/// AI 标注失败
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    /// 服务暂时不可用（5xx、连接失败、过载）
    #[error("标注服务不可用: {message}")]
    ServiceUnavailable { message: String },

    /// 配额耗尽，需要较长的退避
    #[error("标注服务配额耗尽: {message}")]
    QuotaExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    /// 服务返回的数据不符合标注结构
    #[error("标注响应结构不符: {reason}")]
    InvalidResponseShape { reason: String },

    /// 服务拒绝了请求，且原因不在可重试列表中
    #[error("标注服务拒绝请求: {message}")]
    Rejected { message: String },

    /// 输入文本为空
    #[error("待标注文本为空: {identifier}")]
    EmptyText { identifier: String },
}

impl EnrichmentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EnrichmentError::ServiceUnavailable { .. } | EnrichmentError::QuotaExceeded { .. } => {
                ErrorClass::Transient
            }
            EnrichmentError::InvalidResponseShape { .. }
            | EnrichmentError::Rejected { .. }
            | EnrichmentError::EmptyText { .. } => ErrorClass::Permanent,
        }
    }

    pub fn shape(reason: impl Into<String>) -> Self {
        EnrichmentError::InvalidResponseShape {
            reason: reason.into(),
        }
    }
}

/// 输出写入失败
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("写入文件失败 ({path}): {message}")]
    WriteFailed { path: String, message: String },

    #[error("读取已有输出失败 ({path}): {message}")]
    ReadFailed { path: String, message: String },

    #[error("序列化失败: {message}")]
    SerializeFailed { message: String },
}

/// 编排层看到的统一错误类型
///
/// `stage_fn` 返回 `Result<T, ErrorKind>`，编排层只通过 [`ErrorKind::class`]
/// 决定是否重试。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    #[error(transparent)]
    Output(#[from] OutputError),

    /// 单次尝试超过 attempt_timeout
    #[error("单次尝试超时 ({0:?})")]
    Timeout(Duration),

    /// 批处理被取消，该条目没有（再）被尝试
    #[error("批处理已取消，条目未完成")]
    Cancelled,

    /// stage 函数 panic，只影响该条目
    #[error("处理过程中发生 panic: {0}")]
    Panicked(String),

    /// 无法识别的错误
    #[error("未分类错误: {0}")]
    Other(String),
}

impl ErrorKind {
    /// 错误分类（全覆盖，未知错误按 Permanent 处理）
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::Fetch(e) => e.class(),
            ErrorKind::Parse(e) => e.class(),
            ErrorKind::Enrichment(e) => e.class(),
            ErrorKind::Output(_) => ErrorClass::Permanent,
            ErrorKind::Timeout(_) | ErrorKind::Cancelled => ErrorClass::Transient,
            ErrorKind::Panicked(_) | ErrorKind::Other(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class().is_transient()
    }

    /// 错误自带的建议等待时间（限流 / 配额）
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            ErrorKind::Fetch(FetchError::RateLimited { retry_after, .. }) => *retry_after,
            ErrorKind::Enrichment(EnrichmentError::QuotaExceeded { retry_after, .. }) => {
                *retry_after
            }
            _ => None,
        }
    }

    /// 稳定的机器可读错误代码（写入批处理报告）
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Fetch(e) => match e {
                FetchError::NotFound { .. } => "not_found",
                FetchError::NetworkTimeout { .. } => "network_timeout",
                FetchError::RateLimited { .. } => "rate_limited",
                FetchError::InvalidIdentifier { .. } => "invalid_identifier",
                FetchError::ServerError { .. } => "server_error",
                FetchError::UnexpectedStatus { .. } => "unexpected_status",
                FetchError::ReadFailed { .. } => "read_failed",
            },
            ErrorKind::Parse(e) => match e {
                ParseError::MissingRequiredField { .. } => "missing_required_field",
                ParseError::MalformedClaimStructure { .. } => "malformed_claim_structure",
                ParseError::UnsupportedDocumentFormat { .. } => "unsupported_document_format",
            },
            ErrorKind::Enrichment(e) => match e {
                EnrichmentError::ServiceUnavailable { .. } => "service_unavailable",
                EnrichmentError::QuotaExceeded { .. } => "quota_exceeded",
                EnrichmentError::InvalidResponseShape { .. } => "invalid_response_shape",
                EnrichmentError::Rejected { .. } => "rejected",
                EnrichmentError::EmptyText { .. } => "empty_text",
            },
            ErrorKind::Output(_) => "output_failed",
            ErrorKind::Timeout(_) => "attempt_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Panicked(_) => "panicked",
            ErrorKind::Other(_) => "other",
        }
    }
}

/// 配置错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: String, reason: String },
}

/// 编排层结果类型
pub type StageResult<T> = Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_exactly_one_class() {
        let transient = [
            ErrorKind::from(FetchError::NetworkTimeout {
                identifier: "US1".into(),
                message: "timed out".into(),
            }),
            ErrorKind::from(FetchError::RateLimited {
                identifier: "US1".into(),
                retry_after: None,
            }),
            ErrorKind::from(EnrichmentError::ServiceUnavailable {
                message: "503".into(),
            }),
            ErrorKind::Timeout(Duration::from_secs(1)),
            ErrorKind::Cancelled,
        ];
        for e in &transient {
            assert_eq!(e.class(), ErrorClass::Transient, "{}", e);
        }

        let permanent = [
            ErrorKind::from(FetchError::NotFound {
                identifier: "US1".into(),
            }),
            ErrorKind::from(FetchError::invalid_identifier("???", "bad")),
            ErrorKind::from(ParseError::missing("title")),
            ErrorKind::from(EnrichmentError::shape("no summary")),
            ErrorKind::Panicked("boom".into()),
            ErrorKind::Other("?".into()),
        ];
        for e in &permanent {
            assert_eq!(e.class(), ErrorClass::Permanent, "{}", e);
        }
    }

    #[test]
    fn test_retry_hint_only_for_rate_limit_and_quota() {
        let hint = Duration::from_secs(7);
        let rate = ErrorKind::from(FetchError::RateLimited {
            identifier: "US1".into(),
            retry_after: Some(hint),
        });
        assert_eq!(rate.retry_hint(), Some(hint));

        let quota = ErrorKind::from(EnrichmentError::QuotaExceeded {
            message: "quota".into(),
            retry_after: Some(hint),
        });
        assert_eq!(quota.retry_hint(), Some(hint));

        assert_eq!(ErrorKind::Timeout(hint).retry_hint(), None);
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorKind::Cancelled.code(), "cancelled");
        assert_eq!(
            ErrorKind::from(ParseError::MalformedClaimStructure {
                claim: 2,
                depends_on: 3,
                reason: "forward".into(),
            })
            .code(),
            "malformed_claim_structure"
        );
    }
}
