//! AI 标注服务 - 业务能力层
//!
//! ## 职责
//!
//! - 根据 `EnrichmentSchema` 构造提示词，调用 `AnnotationService`
//! - 修复并校验模型返回的 JSON，结构不符时返回 `InvalidResponseShape`
//! - 只处理单条文本，与 Fetcher / Extractor 无关
//!
//! ## 接受的响应结构
//!
//! ```text
//! 扁平：{ "summary", "key_points": [..], "categories": [..], "key_technology"? }
//! 嵌套：{ "technical_content": { "one_liner_summary", "five_keypoints_summary": [..],
//!                                "category_of_technology": [..], "key_technology"? } }
//! ```

use crate::error::EnrichmentError;
use crate::models::{EnrichmentResult, EnrichmentSchema};
use crate::services::llm_service::AnnotationService;
use crate::utils::logging::truncate_text;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// 送给模型的正文上限（字符数）
const MAX_INPUT_CHARS: usize = 60_000;

fn trailing_comma_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("尾逗号正则非法"))
}

/// 标注服务
pub struct Enricher {
    service: Arc<dyn AnnotationService>,
}

impl Enricher {
    pub fn new(service: Arc<dyn AnnotationService>) -> Self {
        Self { service }
    }

    /// 对一段文本生成标注（单次尝试）
    pub async fn enrich(
        &self,
        patent_number: &str,
        text: &str,
        schema: &EnrichmentSchema,
    ) -> Result<EnrichmentResult, EnrichmentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EnrichmentError::EmptyText {
                identifier: patent_number.to_string(),
            });
        }

        let input: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let raw = self
            .service
            .complete(&system_prompt(schema), &input)
            .await?;
        debug!("标注响应 ({}): {}", patent_number, truncate_text(&raw, 120));

        parse_response(&raw, patent_number, schema, self.service.model_name())
    }
}

/// 构造系统提示词
pub fn system_prompt(schema: &EnrichmentSchema) -> String {
    let mut prompt = format!(
        "You are a patent analyst. Read the patent text and reply with a single JSON object \
         and nothing else, using exactly these keys:\n\
         {{\"summary\": string, \"key_points\": [string], \"categories\": [string], \"key_technology\": string}}\n\
         - summary: one sentence including the value proposition, at most {} words\n\
         - key_points: at most {} short points\n\
         - key_technology: at most 3 words\n",
        schema.summary_max_words, schema.max_key_points
    );
    if schema.taxonomy.is_empty() {
        prompt.push_str("- categories: 1 to 3 main technological fields\n");
    } else {
        prompt.push_str(&format!(
            "- categories: 1 to 3 labels chosen only from: {}\n",
            schema.taxonomy.join(", ")
        ));
    }
    prompt
}

/// 修复常见的格式问题：代码块围栏、JSON 前后的说明文字、尾逗号
pub fn repair_json(raw: &str) -> Result<String, EnrichmentError> {
    let trimmed = raw.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| EnrichmentError::shape("响应中没有 JSON 对象"))?;
    let end = trimmed
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| EnrichmentError::shape("响应中的 JSON 对象不完整"))?;

    Ok(trailing_comma_regex()
        .replace_all(&trimmed[start..=end], "$1")
        .to_string())
}

/// 解析并校验模型响应
pub fn parse_response(
    raw: &str,
    patent_number: &str,
    schema: &EnrichmentSchema,
    model: &str,
) -> Result<EnrichmentResult, EnrichmentError> {
    let json = repair_json(raw)?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| EnrichmentError::shape(format!("JSON 解析失败: {}", e)))?;
    let root = value
        .as_object()
        .ok_or_else(|| EnrichmentError::shape("响应不是 JSON 对象"))?;

    let fields = match root.get("technical_content").and_then(Value::as_object) {
        Some(nested) => Fields::nested(nested),
        None => Fields::flat(root),
    };

    let summary = fields
        .summary
        .ok_or_else(|| EnrichmentError::shape("缺少 summary"))?
        .as_str()
        .ok_or_else(|| EnrichmentError::shape("summary 不是字符串"))?
        .to_string();

    let mut key_points = string_list(
        fields
            .key_points
            .ok_or_else(|| EnrichmentError::shape("缺少 key_points"))?,
        "key_points",
    )?;
    key_points.truncate(schema.max_key_points);

    let mut categories = BTreeSet::new();
    if let Some(value) = fields.categories {
        for label in string_list(value, "categories")? {
            let canonical = schema.canonical_category(&label).ok_or_else(|| {
                EnrichmentError::shape(format!("分类 '{}' 不在分类体系中", label))
            })?;
            categories.insert(canonical);
        }
    }

    let key_technology = match fields.key_technology {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => return Err(EnrichmentError::shape("key_technology 不是字符串")),
    };

    Ok(
        EnrichmentResult::new(patent_number, summary, key_points, categories, model)?
            .with_key_technology(key_technology),
    )
}

struct Fields<'a> {
    summary: Option<&'a Value>,
    key_points: Option<&'a Value>,
    categories: Option<&'a Value>,
    key_technology: Option<&'a Value>,
}

impl<'a> Fields<'a> {
    fn flat(obj: &'a Map<String, Value>) -> Self {
        Self {
            summary: obj.get("summary"),
            key_points: obj.get("key_points"),
            categories: obj.get("categories"),
            key_technology: obj.get("key_technology"),
        }
    }

    fn nested(obj: &'a Map<String, Value>) -> Self {
        Self {
            summary: obj.get("one_liner_summary"),
            key_points: obj.get("five_keypoints_summary"),
            categories: obj.get("category_of_technology"),
            key_technology: obj.get("key_technology"),
        }
    }
}

/// 字符串数组（单个字符串视为只有一个元素），空白项丢弃
fn string_list(value: &Value, field: &str) -> Result<Vec<String>, EnrichmentError> {
    match value {
        Value::String(s) => Ok(vec![s.trim().to_string()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| EnrichmentError::shape(format!("{} 中含有非字符串元素", field)))
            })
            .filter(|r| r.as_ref().map(|s| !s.is_empty()).unwrap_or(true))
            .collect(),
        _ => Err(EnrichmentError::shape(format!("{} 不是字符串数组", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedService {
        response: Result<String, EnrichmentError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnnotationService for FixedService {
        fn model_name(&self) -> &str {
            "fixed-model"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn enricher(response: Result<String, EnrichmentError>) -> (Enricher, Arc<FixedService>) {
        let service = Arc::new(FixedService {
            response,
            calls: AtomicUsize::new(0),
        });
        (Enricher::new(service.clone()), service)
    }

    #[test]
    fn test_repair_json_strips_fences_and_trailing_commas() {
        let raw = "```json\n{\"summary\": \"x\", \"key_points\": [\"a\", \"b\",],}\n```";
        assert_eq!(
            repair_json(raw).unwrap(),
            "{\"summary\": \"x\", \"key_points\": [\"a\", \"b\"]}"
        );
        assert!(repair_json("no json here").is_err());
    }

    #[test]
    fn test_parse_flat_layout_truncates_key_points() {
        let schema = EnrichmentSchema {
            max_key_points: 2,
            ..Default::default()
        };
        let raw = r#"{"summary": "Folds itself.", "key_points": ["a", "b", "c"],
                      "categories": ["Robotics"], "key_technology": "hinge"}"#;
        let result = parse_response(raw, "US1", &schema, "m").unwrap();
        assert_eq!(result.summary, "Folds itself.");
        assert_eq!(result.key_points, vec!["a", "b"]);
        assert!(result.categories.contains("Robotics"));
        assert_eq!(result.key_technology.as_deref(), Some("hinge"));
        assert_eq!(result.model, "m");
    }

    #[test]
    fn test_parse_nested_layout() {
        let raw = r#"{"technical_content": {"one_liner_summary": "Folds.",
                      "five_keypoints_summary": ["a"], "category_of_technology": ["Robotics", "Materials"]}}"#;
        let result = parse_response(raw, "US1", &EnrichmentSchema::default(), "m").unwrap();
        assert_eq!(result.summary, "Folds.");
        assert_eq!(result.categories.len(), 2);
        assert_eq!(result.key_technology, None);
    }

    #[test]
    fn test_shape_mismatches_are_invalid_response_shape() {
        let schema = EnrichmentSchema {
            taxonomy: vec!["Software".to_string()],
            ..Default::default()
        };
        let cases = [
            r#"["not", "an", "object"]"#,
            r#"{"key_points": []}"#,
            r#"{"summary": 42, "key_points": []}"#,
            r#"{"summary": "x"}"#,
            r#"{"summary": "x", "key_points": [1, 2]}"#,
            r#"{"summary": "  ", "key_points": []}"#,
            r#"{"summary": "x", "key_points": [], "categories": ["Agriculture"]}"#,
        ];
        for raw in cases {
            assert!(
                matches!(
                    parse_response(raw, "US1", &schema, "m"),
                    Err(EnrichmentError::InvalidResponseShape { .. })
                ),
                "{}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_enrich_calls_service_once() {
        let (enricher, service) = enricher(Ok(
            r#"{"summary": "Folds.", "key_points": ["a"], "categories": []}"#.to_string(),
        ));
        let result = enricher
            .enrich("US1", "Patent US1 text", &EnrichmentSchema::default())
            .await
            .unwrap();
        assert_eq!(result.patent_number, "US1");
        assert_eq!(result.model, "fixed-model");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enrich_empty_text_skips_service() {
        let (enricher, service) = enricher(Ok("{}".to_string()));
        let err = enricher
            .enrich("US1", "   ", &EnrichmentSchema::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::EmptyText { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enrich_passes_service_errors_through() {
        let (enricher, _) = enricher(Err(EnrichmentError::ServiceUnavailable {
            message: "503".to_string(),
        }));
        let err = enricher
            .enrich("US1", "text", &EnrichmentSchema::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::ServiceUnavailable { .. }));
    }
}
