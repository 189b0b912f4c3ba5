//! 条目处理上下文
//!
//! 封装"我正在处理第几个条目的第几次尝试"这一信息，只用于日志

use std::fmt::Display;
use tracing::{info_span, Span};

/// 条目处理上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCtx {
    /// 条目在输入中的位置（从 1 开始）
    pub index: usize,

    /// 本次运行的条目总数
    pub total: usize,

    /// 条目标识符
    pub identifier: String,

    /// 当前尝试次数（从 1 开始）
    pub attempt: u32,
}

impl ItemCtx {
    /// 创建新的条目上下文
    pub fn new(index: usize, total: usize, identifier: impl Into<String>, attempt: u32) -> Self {
        Self {
            index,
            total,
            identifier: identifier.into(),
            attempt,
        }
    }

    /// 一次尝试的 span，其中的日志行都带上 `[专利 i/n id 第k次]`
    pub fn span(&self) -> Span {
        info_span!("item", ctx = %self)
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[专利 {}/{} {} 第{}次]",
            self.index, self.total, self.identifier, self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            ItemCtx::new(3, 10, "US123", 2).to_string(),
            "[专利 3/10 US123 第2次]"
        );
    }
}
