//! 专利标识符工具
//!
//! 专利号格式：两位国家代码 + 数字 + 可选的类型代码，例如 `US10000000B2`、`EP1234567A1`。

use regex::Regex;
use std::sync::OnceLock;

fn patent_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{2}\d+[A-Z]?\d*$").expect("专利号正则非法"))
}

/// 去掉分隔符并转大写：`us-10000000-b2` → `US10000000B2`
pub fn normalize_patent_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | ' ' | ',' | '/'))
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// 是否为专利号（先规范化再匹配）
pub fn is_patent_number(raw: &str) -> bool {
    let normalized = normalize_patent_number(raw.trim());
    !normalized.is_empty() && patent_number_regex().is_match(&normalized)
}

/// 是否为 http(s) URL
pub fn is_url(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// 从专利页 URL 中取出专利号（`/patent/{id}/...`）
pub fn patent_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/patent/")?;
    let id = rest.split(['/', '?', '#']).next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(normalize_patent_number(id))
    }
}

/// 拼接专利页 URL
pub fn patent_url(base_url: &str, patent_number: &str) -> String {
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    format!("{}{}/en", base, normalize_patent_number(patent_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patent_number_patterns() {
        assert!(is_patent_number("US10000000B2"));
        assert!(is_patent_number("US-10000000-B2"));
        assert!(is_patent_number("EP1234567A1"));
        assert!(is_patent_number("US0000001"));
        assert!(!is_patent_number("10000000"));
        assert!(!is_patent_number("https://example.com"));
        assert!(!is_patent_number(""));
    }

    #[test]
    fn test_patent_id_from_url() {
        assert_eq!(
            patent_id_from_url("https://patents.google.com/patent/US10000000B2/en"),
            Some("US10000000B2".to_string())
        );
        assert_eq!(
            patent_id_from_url("https://patents.google.com/patent/EP1234567A1?oq=x"),
            Some("EP1234567A1".to_string())
        );
        assert_eq!(patent_id_from_url("https://example.com/doc"), None);
    }

    #[test]
    fn test_patent_url() {
        assert_eq!(
            patent_url("https://patents.google.com/patent", "us-1-b2"),
            "https://patents.google.com/patent/US1B2/en"
        );
    }
}
