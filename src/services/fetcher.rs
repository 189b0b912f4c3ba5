//! 文档获取服务 - 业务能力层
//!
//! 只负责"取回原始内容"能力：网络 URL 或本地文件，每次调用只尝试一次。
//! 重试属于编排层，这里只把失败分类成 `FetchError`。

use crate::config::StatusPolicy;
use crate::error::FetchError;
use crate::infrastructure::HttpSession;
use crate::models::identifier::{is_patent_number, is_url, patent_id_from_url, patent_url};
use crate::models::SourceType;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 取回的原始文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub content: String,
    /// 实际读取的 URL 或路径
    pub source: String,
    pub source_type: SourceType,
    /// 从标识符推断出的专利号（文档本身缺失时不作为兜底，只用于日志和文件名预检）
    pub patent_hint: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

/// 标识符解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Url {
        url: String,
        patent_hint: Option<String>,
    },
    LocalFile(PathBuf),
}

impl ResolvedSource {
    pub fn patent_hint(&self) -> Option<String> {
        match self {
            ResolvedSource::Url { patent_hint, .. } => patent_hint.clone(),
            ResolvedSource::LocalFile(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| is_patent_number(s)),
        }
    }
}

/// 把标识符解析成可读取的来源
///
/// - 专利号 → `{base_url}{number}/en`
/// - http(s) URL → 原样
/// - 其他 → 本地路径（未标记来源类型时，必须存在或看起来像路径）
pub fn resolve(
    identifier: &str,
    source_type: Option<SourceType>,
    base_url: &str,
) -> Result<ResolvedSource, FetchError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(FetchError::invalid_identifier(identifier, "标识符为空"));
    }

    let as_url = || -> Result<ResolvedSource, FetchError> {
        if is_url(identifier) {
            reqwest::Url::parse(identifier)
                .map_err(|e| FetchError::invalid_identifier(identifier, e.to_string()))?;
            Ok(ResolvedSource::Url {
                url: identifier.to_string(),
                patent_hint: patent_id_from_url(identifier),
            })
        } else if is_patent_number(identifier) {
            let url = patent_url(base_url, identifier);
            Ok(ResolvedSource::Url {
                patent_hint: patent_id_from_url(&url),
                url,
            })
        } else {
            Err(FetchError::invalid_identifier(
                identifier,
                "既不是 URL 也不是专利号",
            ))
        }
    };

    match source_type {
        Some(SourceType::Url) => as_url(),
        Some(SourceType::LocalFile) => Ok(ResolvedSource::LocalFile(PathBuf::from(identifier))),
        None => {
            let has_separator = identifier.contains(['/', '\\']);
            if is_url(identifier) || (!has_separator && is_patent_number(identifier)) {
                as_url()
            } else if looks_like_path(identifier) {
                Ok(ResolvedSource::LocalFile(PathBuf::from(identifier)))
            } else {
                Err(FetchError::invalid_identifier(
                    identifier,
                    "既不是 URL、专利号，也不是文件路径",
                ))
            }
        }
    }
}

fn looks_like_path(identifier: &str) -> bool {
    let path = Path::new(identifier);
    path.exists()
        || identifier.contains('/')
        || identifier.contains('\\')
        || path.extension().is_some()
}

/// 按状态码策略分类响应
pub fn classify_status(
    identifier: &str,
    status: u16,
    retry_after: Option<Duration>,
    policy: &StatusPolicy,
) -> Result<(), FetchError> {
    let identifier = identifier.to_string();
    if policy.rate_limited.contains(&status) {
        Err(FetchError::RateLimited {
            identifier,
            retry_after,
        })
    } else if policy.not_found.contains(&status) {
        Err(FetchError::NotFound { identifier })
    } else if policy.transient.contains(&status) {
        Err(FetchError::ServerError { identifier, status })
    } else if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(FetchError::UnexpectedStatus { identifier, status })
    }
}

/// 文档获取服务
///
/// 职责：
/// - 解析标识符（专利号 / URL / 本地路径）
/// - 读取网络或本地内容
/// - 只处理单个文档，不关心批处理
pub struct Fetcher {
    session: HttpSession,
    base_url: String,
    status_policy: StatusPolicy,
}

impl Fetcher {
    /// 创建新的获取服务（会话由调用方持有并传入）
    pub fn new(session: HttpSession, base_url: impl Into<String>, status_policy: StatusPolicy) -> Self {
        Self {
            session,
            base_url: base_url.into(),
            status_policy,
        }
    }

    pub fn resolve(
        &self,
        identifier: &str,
        source_type: Option<SourceType>,
    ) -> Result<ResolvedSource, FetchError> {
        resolve(identifier, source_type, &self.base_url)
    }

    /// 取回原始内容（单次尝试）
    pub async fn fetch(
        &self,
        identifier: &str,
        source_type: Option<SourceType>,
    ) -> Result<RawDocument, FetchError> {
        let resolved = self.resolve(identifier, source_type)?;
        let patent_hint = resolved.patent_hint();

        match resolved {
            ResolvedSource::Url { url, .. } => {
                let content = self.fetch_url(identifier, &url).await?;
                Ok(RawDocument {
                    content,
                    source: url,
                    source_type: SourceType::Url,
                    patent_hint,
                    retrieved_at: Utc::now(),
                })
            }
            ResolvedSource::LocalFile(path) => {
                let content = read_local_file(&path).await?;
                Ok(RawDocument {
                    content,
                    source: path.to_string_lossy().to_string(),
                    source_type: SourceType::LocalFile,
                    patent_hint,
                    retrieved_at: Utc::now(),
                })
            }
        }
    }

    async fn fetch_url(&self, identifier: &str, url: &str) -> Result<String, FetchError> {
        let response = self
            .session
            .get(url)
            .await
            .map_err(|e| classify_transport_error(identifier, url, &e))?;

        classify_status(
            identifier,
            response.status,
            response.retry_after,
            &self.status_policy,
        )?;

        debug!("获取成功: {} ({} 字节)", url, response.body.len());
        Ok(response.body)
    }
}

/// 按 reqwest 错误的种类分类
///
/// 超时、连接失败、发送失败和响应体中断可以重试；
/// 重定向循环或解码失败重试也不会变，直接放弃。
pub fn classify_transport_error(
    identifier: &str,
    url: &str,
    error: &reqwest::Error,
) -> FetchError {
    if error.is_builder() {
        FetchError::invalid_identifier(identifier, error.to_string())
    } else if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        FetchError::NetworkTimeout {
            identifier: identifier.to_string(),
            message: error.to_string(),
        }
    } else {
        FetchError::ReadFailed {
            path: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// 读取本地文件为文本
pub async fn read_local_file(path: &Path) -> Result<String, FetchError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FetchError::NotFound {
                identifier: path.to_string_lossy().to_string(),
            }
        } else {
            FetchError::ReadFailed {
                path: path.to_string_lossy().to_string(),
                message: e.to_string(),
            }
        }
    })?;

    String::from_utf8(bytes).map_err(|_| FetchError::ReadFailed {
        path: path.to_string_lossy().to_string(),
        message: "不是有效的 UTF-8 文本".to_string(),
    })
}
