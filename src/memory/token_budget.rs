//! 上下文预算计量
//!
//! 压缩阈值既可以按字符数（与历史行为一致）也可以按估算 token 数计量。
//! 两种计量都只依赖渲染后的消息内容：确定性、无副作用。

use serde::Deserialize;

use crate::memory::Message;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars.div_ceil(4) + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

/// 预算单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    /// 渲染内容的 Unicode 字符数
    #[default]
    Chars,
    /// 估算 token 数
    Tokens,
}

impl BudgetUnit {
    pub fn measure_text(&self, text: &str) -> usize {
        match self {
            BudgetUnit::Chars => text.chars().count(),
            BudgetUnit::Tokens => TokenEstimator::estimate(text),
        }
    }

    /// 计量一组渲染后的消息（仅内容，角色不计入）
    pub fn measure(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.measure_text(&m.content)).sum()
    }
}
