use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 来源类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// 网络文档（专利号或 URL）
    Url,
    /// 本地文件（HTML 或已提取的原始文本）
    LocalFile,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Url => "url",
            SourceType::LocalFile => "local-file",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "url" => Ok(SourceType::Url),
            "local-file" | "local_file" | "file" => Ok(SourceType::LocalFile),
            other => Err(format!("未知的来源类型: {}", other)),
        }
    }
}

/// 处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// 获取 + 解析 → PatentRecord
    Extract,
    /// AI 标注 → EnrichmentResult
    Enrich,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Enrich => "enrich",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extract" => Ok(Stage::Extract),
            "enrich" => Ok(Stage::Enrich),
            other => Err(format!("未知的处理阶段: {}", other)),
        }
    }
}

/// 批处理的一个工作单元
///
/// 入队后不可变：字段私有，只暴露只读访问。
/// 相同标识符的多个 WorkItem 互相独立，不做去重。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_type: Option<SourceType>,
    stage: Stage,
}

impl WorkItem {
    /// 创建新的工作单元（来源类型由 Fetcher 推断）
    pub fn new(identifier: impl Into<String>, stage: Stage) -> Self {
        Self {
            identifier: identifier.into().trim().to_string(),
            source_type: None,
            stage,
        }
    }

    pub fn extract(identifier: impl Into<String>) -> Self {
        Self::new(identifier, Stage::Extract)
    }

    pub fn enrich(identifier: impl Into<String>) -> Self {
        Self::new(identifier, Stage::Enrich)
    }

    /// 显式指定来源类型
    pub fn with_source(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn source_type(&self) -> Option<SourceType> {
        self.source_type
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source_type {
            Some(source) => write!(f, "{} ({}, {})", self.identifier, self.stage, source),
            None => write!(f, "{} ({})", self.identifier, self.stage),
        }
    }
}
