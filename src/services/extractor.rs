//! 专利页解析服务 - 业务能力层
//!
//! ## 职责
//!
//! - 把 Fetcher 取回的 HTML 解析成 `PatentRecord`
//! - 纯函数：同样的输入永远得到同样的记录或同样的错误，没有副作用
//! - 权利要求依赖关系由 `PatentRecordBuilder::build` 统一校验
//!
//! ## 字段来源（Google Patents 的 `itemprop` 标注）
//!
//! | 字段 | 选择器 |
//! |---|---|
//! | 专利号 | `dd[itemprop=publicationNumber]` |
//! | 标题 | `[itemprop=title]`，其次 `meta[name=DC.title]` |
//! | 发明人 / 权利人 | `[itemprop=inventor]` / `[itemprop=assigneeOriginal]` `[itemprop=assigneeCurrent]` |
//! | 日期 | `[itemprop=priorityDate]` 等，读 `datetime` 属性 |
//! | 摘要 / 说明书 | `[itemprop=abstract]` / `[itemprop=description]` |
//! | 权利要求 | `.claim`，引用关系来自 `claim-ref[idref]` |
//! | 引用 | `tr[itemprop=forwardReferences*]` / `tr[itemprop=backwardReferences*]` |

use crate::error::ParseError;
use crate::models::identifier::normalize_patent_number;
use crate::models::{PatentClaim, PatentRecord, Provenance};
use crate::services::fetcher::RawDocument;
use crate::services::normalize::collapse_whitespace;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

struct Selectors {
    itemprop: Selector,
    publication_number: Selector,
    publication_number_any: Selector,
    title: Selector,
    dc_title: Selector,
    inventor: Selector,
    assignee: Selector,
    priority_date: Selector,
    filing_date: Selector,
    publication_date: Selector,
    grant_date: Selector,
    abstract_section: Selector,
    description_section: Selector,
    claim: Selector,
    claim_ref: Selector,
    forward_citation: Selector,
    backward_citation: Selector,
}

fn parse_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("选择器非法 {}: {:?}", css, e))
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        itemprop: parse_selector("[itemprop]"),
        publication_number: parse_selector("dd[itemprop=publicationNumber]"),
        publication_number_any: parse_selector("[itemprop=publicationNumber]"),
        title: parse_selector("[itemprop=title]"),
        dc_title: parse_selector("meta[name=\"DC.title\"]"),
        inventor: parse_selector("[itemprop=inventor]"),
        assignee: parse_selector("[itemprop=assigneeOriginal], [itemprop=assigneeCurrent]"),
        priority_date: parse_selector("[itemprop=priorityDate]"),
        filing_date: parse_selector("[itemprop=filingDate]"),
        publication_date: parse_selector("[itemprop=publicationDate]"),
        grant_date: parse_selector("[itemprop=grantDate]"),
        abstract_section: parse_selector("[itemprop=abstract]"),
        description_section: parse_selector("[itemprop=description]"),
        claim: parse_selector(".claim"),
        claim_ref: parse_selector("claim-ref"),
        forward_citation: parse_selector(
            "tr[itemprop=forwardReferencesOrig] [itemprop=publicationNumber], \
             tr[itemprop=forwardReferencesFamily] [itemprop=publicationNumber]",
        ),
        backward_citation: parse_selector(
            "tr[itemprop=backwardReferencesOrig] [itemprop=publicationNumber], \
             tr[itemprop=backwardReferencesFamily] [itemprop=publicationNumber], \
             tr[itemprop=backwardReferences] [itemprop=publicationNumber]",
        ),
    })
}

fn claim_text_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bclaims?\s+(\d+)").expect("权利要求引用正则非法"))
}

fn leading_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*\.\s*").expect("权利要求序号正则非法"))
}

/// 解析 Fetcher 取回的文档
pub fn extract(doc: &RawDocument) -> Result<PatentRecord, ParseError> {
    extract_html(
        &doc.content,
        Provenance {
            source: doc.source.clone(),
            source_type: doc.source_type,
            retrieved_at: doc.retrieved_at,
        },
    )
}

/// 解析 HTML 文本
pub fn extract_html(content: &str, provenance: Provenance) -> Result<PatentRecord, ParseError> {
    if content.trim().is_empty() {
        return Err(ParseError::UnsupportedDocumentFormat {
            reason: "文档为空".to_string(),
        });
    }
    if !content.contains('<') {
        return Err(ParseError::UnsupportedDocumentFormat {
            reason: "不是 HTML 文档".to_string(),
        });
    }

    let html = Html::parse_document(content);
    let s = selectors();

    if html.select(&s.itemprop).next().is_none() {
        return Err(ParseError::UnsupportedDocumentFormat {
            reason: "未找到 itemprop 标注，不是可识别的专利页面".to_string(),
        });
    }

    let patent_number = html
        .select(&s.publication_number)
        .next()
        .or_else(|| html.select(&s.publication_number_any).next())
        .map(|el| normalize_patent_number(&element_text(el)))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParseError::missing("patent_number"))?;

    let title = html
        .select(&s.title)
        .map(element_text)
        .find(|t| !t.is_empty())
        .or_else(|| {
            html.select(&s.dc_title)
                .filter_map(|el| el.value().attr("content"))
                .map(collapse_whitespace)
                .find(|t| !t.is_empty())
        })
        .ok_or_else(|| ParseError::missing("title"))?;

    let abstract_text = html
        .select(&s.abstract_section)
        .next()
        .map(|el| strip_heading(&element_text(el), "Abstract"))
        .unwrap_or_default();

    let description = html
        .select(&s.description_section)
        .next()
        .map(|el| strip_heading(&element_text(el), "Description"))
        .unwrap_or_default();

    PatentRecord::builder(patent_number, provenance)
        .title(title)
        .inventors(distinct_texts(&html, &s.inventor))
        .assignees(distinct_texts(&html, &s.assignee))
        .priority_date(first_date(&html, &s.priority_date))
        .filing_date(first_date(&html, &s.filing_date))
        .publication_date(first_date(&html, &s.publication_date))
        .grant_date(first_date(&html, &s.grant_date))
        .abstract_text(abstract_text)
        .description(description)
        .claims(extract_claims(&html))
        .forward_citations(citation_numbers(&html, &s.forward_citation))
        .backward_citations(citation_numbers(&html, &s.backward_citation))
        .build()
}

fn element_text(el: ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// 去掉区块开头的标题词（`Abstract ...` → `...`）
fn strip_heading(text: &str, heading: &str) -> String {
    text.strip_prefix(heading)
        .map(|rest| rest.trim_start().to_string())
        .unwrap_or_else(|| text.to_string())
}

fn distinct_texts(html: &Html, selector: &Selector) -> Vec<String> {
    let mut seen = HashSet::new();
    html.select(selector)
        .map(element_text)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

fn first_date(html: &Html, selector: &Selector) -> Option<NaiveDate> {
    html.select(selector).find_map(|el| {
        let raw = el
            .value()
            .attr("datetime")
            .map(str::to_string)
            .unwrap_or_else(|| element_text(el));
        parse_date(&raw)
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn citation_numbers(html: &Html, selector: &Selector) -> Vec<String> {
    let mut seen = HashSet::new();
    html.select(selector)
        .map(|el| normalize_patent_number(&element_text(el)))
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .collect()
}

fn is_inside_claim(el: &ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().classes().any(|c| c == "claim"))
}

/// 解析权利要求
///
/// 序号优先取 `num` 属性，其次取正文开头的 `N.`，都没有时按出现顺序编号。
/// 引用关系优先取 `claim-ref[idref]`，其次匹配正文里的 `claim N`。
fn extract_claims(html: &Html) -> Vec<PatentClaim> {
    let s = selectors();
    let mut claims = Vec::new();

    for el in html.select(&s.claim).filter(|el| !is_inside_claim(el)) {
        let raw_text = element_text(el);
        if raw_text.is_empty() {
            continue;
        }

        let number = el
            .value()
            .attr("num")
            .and_then(|n| n.trim().parse::<u32>().ok())
            .or_else(|| {
                leading_number_regex()
                    .captures(&raw_text)
                    .and_then(|c| c[1].parse().ok())
            })
            .unwrap_or(claims.len() as u32 + 1);

        let depends_on = el
            .select(&s.claim_ref)
            .find_map(|r| r.value().attr("idref").and_then(claim_ref_number))
            .or_else(|| {
                claim_text_reference_regex()
                    .captures(&raw_text)
                    .and_then(|c| c[1].parse().ok())
            });

        let text = leading_number_regex().replace(&raw_text, "").to_string();
        claims.push(match depends_on {
            Some(parent) => PatentClaim::dependent(number, text, parent),
            None => PatentClaim::independent(number, text),
        });
    }

    claims
}

/// `CLM-00003` → 3
fn claim_ref_number(idref: &str) -> Option<u32> {
    idref
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use chrono::Utc;

    fn provenance() -> Provenance {
        Provenance {
            source: "fixture.html".to_string(),
            source_type: SourceType::LocalFile,
            retrieved_at: Utc::now(),
        }
    }

    fn page(claims: &str) -> String {
        format!(
            r#"<html><head><meta name="DC.title" content="Widget"></head><body>
            <dl><dd itemprop="publicationNumber">US0000001B2</dd></dl>
            <span itemprop="title">Self-folding widget
            </span>
            <dd itemprop="inventor">Ada Lovelace</dd>
            <dd itemprop="inventor">Ada Lovelace</dd>
            <dd itemprop="assigneeOriginal">Widget Corp</dd>
            <time itemprop="priorityDate" datetime="2015-03-01">2015-03-01</time>
            <time itemprop="filingDate" datetime="2016-02-27">2016-02-27</time>
            <section itemprop="abstract"><h2>Abstract</h2><div>A widget that folds itself.</div></section>
            <section itemprop="claims"><div class="claims">{}</div></section>
            <section itemprop="description"><h2>Description</h2><p>Long text.</p></section>
            <table>
              <tr itemprop="forwardReferencesOrig"><td><span itemprop="publicationNumber">US0000009A1</span></td></tr>
              <tr itemprop="forwardReferencesFamily"><td><span itemprop="publicationNumber">EP1234567A1</span></td></tr>
              <tr itemprop="backwardReferencesOrig"><td><span itemprop="publicationNumber">US0000002</span></td></tr>
            </table>
            </body></html>"#,
            claims
        )
    }

    const VALID_CLAIMS: &str = r#"
        <div num="00001" id="CLM-00001" class="claim"><div class="claim-text">1. A widget comprising a hinge.</div></div>
        <div class="claim-dependent" num="00002"><div num="00002" id="CLM-00002" class="claim">
          <div class="claim-text">2. The widget of <claim-ref idref="CLM-00001">claim 1</claim-ref>, wherein the hinge is steel.</div>
        </div></div>"#;

    #[test]
    fn test_extract_full_record() {
        let record = extract_html(&page(VALID_CLAIMS), provenance()).unwrap();

        assert_eq!(record.patent_number(), "US0000001B2");
        assert_eq!(record.title(), "Self-folding widget");
        assert_eq!(record.inventors(), ["Ada Lovelace".to_string()]);
        assert_eq!(record.assignees(), ["Widget Corp".to_string()]);
        assert_eq!(record.priority_date(), NaiveDate::from_ymd_opt(2015, 3, 1));
        assert_eq!(record.filing_date(), NaiveDate::from_ymd_opt(2016, 2, 27));
        assert_eq!(record.publication_date(), None);
        assert_eq!(record.abstract_text(), "A widget that folds itself.");
        assert_eq!(record.description(), "Long text.");
        assert_eq!(record.forward_citations(), ["US0000009A1", "EP1234567A1"]);
        assert_eq!(record.backward_citations(), ["US0000002"]);

        let claims = record.claims();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0], PatentClaim::independent(1, "A widget comprising a hinge."));
        assert_eq!(claims[1].depends_on, Some(1));
        assert!(claims[1].text.starts_with("The widget of claim 1"));
    }

    #[test]
    fn test_forward_claim_reference_is_malformed() {
        let claims = r#"
            <div num="1" class="claim">1. A widget.</div>
            <div num="2" class="claim">2. The widget of <claim-ref idref="CLM-00003">claim 3</claim-ref>.</div>
            <div num="3" class="claim">3. The widget of <claim-ref idref="CLM-00001">claim 1</claim-ref>.</div>"#;
        let err = extract_html(&page(claims), provenance()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MalformedClaimStructure {
                claim: 2,
                depends_on: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_publication_number() {
        let html = r#"<html><body><span itemprop="title">Widget</span></body></html>"#;
        assert_eq!(
            extract_html(html, provenance()).unwrap_err(),
            ParseError::missing("patent_number")
        );
    }

    #[test]
    fn test_title_falls_back_to_dc_title() {
        let html = r#"<html><head><meta name="DC.title" content="Widget"></head>
            <body><dd itemprop="publicationNumber">US1</dd></body></html>"#;
        assert_eq!(extract_html(html, provenance()).unwrap().title(), "Widget");
    }

    #[test]
    fn test_unsupported_formats() {
        for content in ["", "   ", "# Patent US1\n\nplain markdown", "<html><body><p>hi</p></body></html>"] {
            assert!(matches!(
                extract_html(content, provenance()),
                Err(ParseError::UnsupportedDocumentFormat { .. })
            ));
        }
    }

    #[test]
    fn test_extract_is_deterministic() {
        let content = page(VALID_CLAIMS);
        let provenance = provenance();
        let a = extract_html(&content, provenance.clone());
        let b = extract_html(&content, provenance);
        assert_eq!(a, b);
    }
}
