//! HTTP 会话 - 基础设施层
//!
//! 持有唯一的连接池（reqwest::Client），只暴露"发 GET 请求"的能力。
//! 由编排层在一次批处理运行期间创建并持有，显式传给 Fetcher，不作为全局状态。

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// 一次 GET 请求的原始响应
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// `Retry-After` 头（只支持秒数形式）
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// HTTP 会话
///
/// 职责：
/// - 持有连接池，在所有 worker 之间共享（`Client` 内部是 Arc，clone 很便宜）
/// - 不认识专利 / 批处理
/// - 不做重试
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    /// 创建新的会话
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml"),
        );

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("无法创建 HTTP 客户端")?;

        Ok(Self { client })
    }

    /// 发送 GET 请求，任何状态码都原样返回
    pub async fn get(&self, url: &str) -> Result<RawResponse, reqwest::Error> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response.text().await?;
        debug!("GET {} → {} ({} 字节)", url, status, body.len());

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// 解析 `Retry-After: <秒数>`
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after(" 120 "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_session_builds() {
        assert!(HttpSession::new("test-agent", Duration::from_secs(5)).is_ok());
    }
}
