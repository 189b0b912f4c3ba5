//! 文本清洗与原始文本渲染
//!
//! 纯函数。`render_markdown` 的输出写到 `text/raw/{专利号}.md`，
//! 同时也是 enrich 阶段可以直接读取的输入。

use crate::models::PatentRecord;
use regex::Regex;
use std::sync::OnceLock;

fn noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0\.000\w+\d+").expect("噪声正则非法"))
}

fn blank_lines_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{4,}").expect("空行正则非法"))
}

/// 合并连续空白为单个空格并去掉首尾空白
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 只保留 ASCII 字符
pub fn keep_ascii(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii()).collect()
}

/// 去掉页面里的排版噪声（`0.000description12` 之类）
pub fn remove_noise(text: &str) -> String {
    noise_regex().replace_all(text, "").to_string()
}

/// 最多保留两个连续空行
pub fn limit_blank_lines(text: &str) -> String {
    blank_lines_regex().replace_all(text, "\n\n\n").to_string()
}

/// 完整清洗流程：ASCII → 去噪 → 限制空行
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    limit_blank_lines(&remove_noise(&keep_ascii(&text)))
}

/// 把记录渲染成 Markdown 风格的原始文本
pub fn render_markdown(record: &PatentRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Patent {}\n\n", record.patent_number()));
    out.push_str(&format!("## {}\n\n", record.title()));

    if !record.inventors().is_empty() {
        out.push_str(&format!("- Inventors: {}\n", record.inventors().join(", ")));
    }
    if !record.assignees().is_empty() {
        out.push_str(&format!("- Assignees: {}\n", record.assignees().join(", ")));
    }
    let dates = [
        ("Priority date", record.priority_date()),
        ("Filing date", record.filing_date()),
        ("Publication date", record.publication_date()),
        ("Grant date", record.grant_date()),
    ];
    for (label, date) in dates {
        if let Some(date) = date {
            out.push_str(&format!("- {}: {}\n", label, date));
        }
    }

    if !record.abstract_text().is_empty() {
        out.push_str("\n---\n\n## Abstract\n\n");
        out.push_str(record.abstract_text());
        out.push('\n');
    }

    if !record.claims().is_empty() {
        out.push_str("\n---\n\n## Claims\n\n");
        for claim in record.claims() {
            out.push_str(&format!("{}. {}\n\n", claim.number, claim.text));
        }
    }

    if !record.description().is_empty() {
        out.push_str("\n---\n\n## Description\n\n");
        out.push_str(record.description());
        out.push('\n');
    }

    clean_text(&out)
}
