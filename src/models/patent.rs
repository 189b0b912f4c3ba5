//! 专利记录模型
//!
//! `PatentRecord` 在构造时校验（必填字段 + 权利要求依赖关系），
//! 非法数据在这里就失败为 `ParseError`，不会以"缺键"的形式流到下游。
//! 从磁盘反序列化已有记录时走同一套校验（`serde(try_from)`）。

use crate::error::ParseError;
use crate::models::work_item::SourceType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 单条权利要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatentClaim {
    /// 序号（从 1 开始）
    pub number: u32,
    pub text: String,
    /// 是否为独立权利要求
    pub independent: bool,
    /// 从属权利要求所引用的序号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<u32>,
}

impl PatentClaim {
    pub fn independent(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            independent: true,
            depends_on: None,
        }
    }

    pub fn dependent(number: u32, text: impl Into<String>, depends_on: u32) -> Self {
        Self {
            number,
            text: text.into(),
            independent: false,
            depends_on: Some(depends_on),
        }
    }
}

/// 校验权利要求集合
///
/// - 序号不能重复、不能为 0
/// - `independent` 与 `depends_on` 必须一致
/// - 从属权利要求只能引用更小的、且存在的序号
pub fn validate_claims(claims: &[PatentClaim]) -> Result<(), ParseError> {
    let mut seen = HashSet::new();

    for claim in claims {
        if claim.number == 0 {
            return Err(ParseError::MalformedClaimStructure {
                claim: 0,
                depends_on: claim.depends_on.unwrap_or(0),
                reason: "权利要求序号必须从 1 开始".to_string(),
            });
        }
        if !seen.insert(claim.number) {
            return Err(ParseError::MalformedClaimStructure {
                claim: claim.number,
                depends_on: claim.depends_on.unwrap_or(0),
                reason: "权利要求序号重复".to_string(),
            });
        }
    }

    for claim in claims {
        match (claim.independent, claim.depends_on) {
            (true, None) => {}
            (true, Some(parent)) | (false, Some(parent)) if parent >= claim.number => {
                return Err(ParseError::MalformedClaimStructure {
                    claim: claim.number,
                    depends_on: parent,
                    reason: "从属权利要求只能引用更靠前的权利要求".to_string(),
                });
            }
            (true, Some(parent)) => {
                return Err(ParseError::MalformedClaimStructure {
                    claim: claim.number,
                    depends_on: parent,
                    reason: "独立权利要求不能引用其他权利要求".to_string(),
                });
            }
            (false, None) => {
                return Err(ParseError::MalformedClaimStructure {
                    claim: claim.number,
                    depends_on: 0,
                    reason: "从属权利要求缺少引用序号".to_string(),
                });
            }
            (false, Some(parent)) => {
                if !seen.contains(&parent) {
                    return Err(ParseError::MalformedClaimStructure {
                        claim: claim.number,
                        depends_on: parent,
                        reason: "引用的权利要求不存在".to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// 记录来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// URL 或本地路径
    pub source: String,
    pub source_type: SourceType,
    pub retrieved_at: DateTime<Utc>,
}

/// 提取出的专利记录（创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PatentRecordBuilder")]
pub struct PatentRecord {
    patent_number: String,
    title: String,
    inventors: Vec<String>,
    assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filing_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    publication_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grant_date: Option<NaiveDate>,
    #[serde(rename = "abstract")]
    abstract_text: String,
    description: String,
    forward_citations: Vec<String>,
    backward_citations: Vec<String>,
    provenance: Provenance,
    claims: Vec<PatentClaim>,
}

impl PatentRecord {
    pub fn builder(patent_number: impl Into<String>, provenance: Provenance) -> PatentRecordBuilder {
        PatentRecordBuilder::new(patent_number, provenance)
    }

    pub fn patent_number(&self) -> &str {
        &self.patent_number
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn inventors(&self) -> &[String] {
        &self.inventors
    }

    pub fn assignees(&self) -> &[String] {
        &self.assignees
    }

    pub fn priority_date(&self) -> Option<NaiveDate> {
        self.priority_date
    }

    pub fn filing_date(&self) -> Option<NaiveDate> {
        self.filing_date
    }

    pub fn publication_date(&self) -> Option<NaiveDate> {
        self.publication_date
    }

    pub fn grant_date(&self) -> Option<NaiveDate> {
        self.grant_date
    }

    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn claims(&self) -> &[PatentClaim] {
        &self.claims
    }

    pub fn forward_citations(&self) -> &[String] {
        &self.forward_citations
    }

    pub fn backward_citations(&self) -> &[String] {
        &self.backward_citations
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// 送给 Enricher 的纯文本
    pub fn annotation_text(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("Patent {}\n", self.patent_number));
        text.push_str(&format!("Title: {}\n", self.title));
        if !self.assignees.is_empty() {
            text.push_str(&format!("Assignees: {}\n", self.assignees.join(", ")));
        }
        if !self.inventors.is_empty() {
            text.push_str(&format!("Inventors: {}\n", self.inventors.join(", ")));
        }
        if !self.abstract_text.is_empty() {
            text.push_str(&format!("\nAbstract:\n{}\n", self.abstract_text));
        }
        if !self.claims.is_empty() {
            text.push_str("\nClaims:\n");
            for claim in &self.claims {
                text.push_str(&format!("{}. {}\n", claim.number, claim.text));
            }
        }
        if !self.description.is_empty() {
            text.push_str(&format!("\nDescription:\n{}\n", self.description));
        }
        text
    }
}

/// `PatentRecord` 的构造器，`build()` 时统一校验
#[derive(Debug, Clone, Deserialize)]
pub struct PatentRecordBuilder {
    patent_number: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    inventors: Vec<String>,
    #[serde(default)]
    assignees: Vec<String>,
    #[serde(default)]
    priority_date: Option<NaiveDate>,
    #[serde(default)]
    filing_date: Option<NaiveDate>,
    #[serde(default)]
    publication_date: Option<NaiveDate>,
    #[serde(default)]
    grant_date: Option<NaiveDate>,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    forward_citations: Vec<String>,
    #[serde(default)]
    backward_citations: Vec<String>,
    provenance: Provenance,
    #[serde(default)]
    claims: Vec<PatentClaim>,
}

impl PatentRecordBuilder {
    pub fn new(patent_number: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            patent_number: patent_number.into(),
            title: String::new(),
            inventors: Vec::new(),
            assignees: Vec::new(),
            priority_date: None,
            filing_date: None,
            publication_date: None,
            grant_date: None,
            abstract_text: String::new(),
            description: String::new(),
            forward_citations: Vec::new(),
            backward_citations: Vec::new(),
            provenance,
            claims: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn inventors(mut self, inventors: Vec<String>) -> Self {
        self.inventors = inventors;
        self
    }

    pub fn assignees(mut self, assignees: Vec<String>) -> Self {
        self.assignees = assignees;
        self
    }

    pub fn priority_date(mut self, date: Option<NaiveDate>) -> Self {
        self.priority_date = date;
        self
    }

    pub fn filing_date(mut self, date: Option<NaiveDate>) -> Self {
        self.filing_date = date;
        self
    }

    pub fn publication_date(mut self, date: Option<NaiveDate>) -> Self {
        self.publication_date = date;
        self
    }

    pub fn grant_date(mut self, date: Option<NaiveDate>) -> Self {
        self.grant_date = date;
        self
    }

    pub fn abstract_text(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = text.into();
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn claims(mut self, claims: Vec<PatentClaim>) -> Self {
        self.claims = claims;
        self
    }

    pub fn forward_citations(mut self, citations: Vec<String>) -> Self {
        self.forward_citations = citations;
        self
    }

    pub fn backward_citations(mut self, citations: Vec<String>) -> Self {
        self.backward_citations = citations;
        self
    }

    /// 校验并生成记录
    pub fn build(self) -> Result<PatentRecord, ParseError> {
        let patent_number = self.patent_number.trim().to_string();
        if patent_number.is_empty() {
            return Err(ParseError::missing("patent_number"));
        }
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ParseError::missing("title"));
        }
        validate_claims(&self.claims)?;

        Ok(PatentRecord {
            patent_number,
            title,
            inventors: self.inventors,
            assignees: self.assignees,
            priority_date: self.priority_date,
            filing_date: self.filing_date,
            publication_date: self.publication_date,
            grant_date: self.grant_date,
            abstract_text: self.abstract_text,
            description: self.description,
            forward_citations: self.forward_citations,
            backward_citations: self.backward_citations,
            provenance: self.provenance,
            claims: self.claims,
        })
    }
}

impl TryFrom<PatentRecordBuilder> for PatentRecord {
    type Error = ParseError;

    fn try_from(builder: PatentRecordBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}
