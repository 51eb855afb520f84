//! Pattern extraction for intents with rigid message formats.
//!
//! A miss is final: callers do not escalate to the generative tier.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{SiftError, SiftResult};
use crate::text::contains_han;
use crate::types::{ExtractedTask, Intent};

static CODE_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u:\b)[A-Za-z0-9]{4,8}(?-u:\b)").unwrap());

/// Markers that make a following number an account or card suffix.
const TAIL_MARKERS: &[&str] = &["尾号", "末四位", "后四位", "ending in", "ending", "tail number"];

const CODE_KEYWORDS: &[&str] = &["码", "code", "otp", "pin"];

static ZH_CALLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:来自|未接来电[:：]?)\s*['‘“"]?([^'’”"()（）,，。\s]+)"#).unwrap()
});

static EN_CALLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:missed call from)\s+(\+?\d[\d\s\-]{5,}\d|[^\s,.;!?]+(?:\s[A-Z][^\s,.;!?]*)?)")
        .unwrap()
});

static ZH_VERB_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(收入|支出|消费|到账|转入|转出)\s*(?:人民币|RMB|CNY|￥|¥)?\s*([\d,]+\.\d{2})\s*元").unwrap()
});

static ZH_AMOUNT_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\d,]+\.\d{2})\s*元\s*(?:已|已经)?(收入|支出|消费|到账|转入|转出)").unwrap()
});

static EN_AMOUNT_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(RMB|CNY|USD|EUR|GBP|HKD|[$¥￥])\s?([\d,]+(?:\.\d{2})?)\s+(?:has been\s+|have been\s+|was\s+|is\s+)?(credited|debited|received|spent|paid|deposited|withdrawn)\b",
    )
    .unwrap()
});

static EN_VERB_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(credited|debited|received|spent|paid|deposited|withdrawn)\b[^\d$¥￥]{0,24}?(RMB|CNY|USD|EUR|GBP|HKD|[$¥￥])\s?([\d,]+(?:\.\d{2})?)",
    )
    .unwrap()
});

static ZH_PICKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(取件码|取餐码|提货码)[:：\s]*([A-Za-z0-9\-]+)").unwrap());

static EN_PICKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:pickup|pick-up|collection) code(?:\s+is)?[:\s]*([A-Za-z0-9\-]*\d[A-Za-z0-9\-]*)")
        .unwrap()
});

static EN_LOCKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:placed|dropped|delivered|left)\s+(?:in|into|at)\s+(?:the\s+|a\s+|your\s+)?(?:parcel\s+)?locker")
        .unwrap()
});

/// Regex-tier extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicExtractor;

impl DeterministicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Intents this tier has patterns for.
    pub fn handles(intent: Intent) -> bool {
        matches!(
            intent,
            Intent::VerificationCode | Intent::MissedCall | Intent::FinancialChange | Intent::Logistics
        )
    }

    /// Extract a task, or `None` if no pattern matches.
    ///
    /// Fails with a contract error for intents this tier has no patterns for.
    pub fn extract(&self, text: &str, intent: Intent) -> SiftResult<Option<ExtractedTask>> {
        let title = match intent {
            Intent::VerificationCode => verification_code(text),
            Intent::MissedCall => Some(missed_call(text)),
            Intent::FinancialChange => financial_change(text),
            Intent::Logistics => logistics(text),
            other => {
                return Err(SiftError::contract(format!(
                    "intent {} has no deterministic patterns",
                    other
                )))
            }
        };
        debug!(intent = %intent, matched = title.is_some(), "Deterministic extraction");
        Ok(title.and_then(|t| ExtractedTask::new(t, None)))
    }
}

fn verification_code(text: &str) -> Option<String> {
    let candidates: Vec<_> = CODE_CANDIDATE
        .find_iter(text)
        .filter(|m| m.as_str().chars().any(|c| c.is_ascii_digit()))
        .filter(|m| !follows_tail_marker(&text[..m.start()]))
        .collect();

    let code = candidates
        .iter()
        .find(|m| follows_code_keyword(&text[..m.start()]))
        .or_else(|| candidates.first())?
        .as_str();

    Some(if contains_han(text) {
        format!("验证码: {}", code)
    } else {
        format!("Verification code: {}", code)
    })
}

fn follows_tail_marker(before: &str) -> bool {
    let before = before
        .trim_end_matches(|c: char| c.is_whitespace() || c == ':' || c == '：')
        .to_lowercase();
    TAIL_MARKERS.iter().any(|m| before.ends_with(m))
}

fn follows_code_keyword(before: &str) -> bool {
    let window: String = before
        .chars()
        .rev()
        .take(12)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<String>()
        .to_lowercase();
    CODE_KEYWORDS.iter().any(|k| window.contains(k))
}

fn missed_call(text: &str) -> String {
    if let Some(caps) = ZH_CALLER.captures(text) {
        return format!("回拨 {}", caps[1].trim());
    }
    if let Some(caps) = EN_CALLER.captures(text) {
        return format!("Call back {}", caps[1].trim());
    }
    if contains_han(text) {
        "回拨未接来电".to_string()
    } else {
        "Return missed call".to_string()
    }
}

fn financial_change(text: &str) -> Option<String> {
    if let Some(caps) = ZH_VERB_AMOUNT.captures(text) {
        return Some(format!("{} {} 元", &caps[1], &caps[2]));
    }
    if let Some(caps) = ZH_AMOUNT_VERB.captures(text) {
        return Some(format!("{} {} 元", &caps[2], &caps[1]));
    }
    if let Some(caps) = EN_AMOUNT_VERB.captures(text) {
        return Some(format!("{} {} {}", caps[3].to_lowercase(), &caps[1], &caps[2]));
    }
    if let Some(caps) = EN_VERB_AMOUNT.captures(text) {
        return Some(format!("{} {} {}", caps[1].to_lowercase(), &caps[2], &caps[3]));
    }
    None
}

fn logistics(text: &str) -> Option<String> {
    if let Some(caps) = ZH_PICKUP.captures(text) {
        return Some(format!("取快递/外卖 ({}: {})", &caps[1], &caps[2]));
    }
    if let Some(caps) = EN_PICKUP.captures(text) {
        return Some(format!("Pick up parcel (code {})", &caps[1]));
    }
    if text.contains("已放入") {
        return Some("取快递 (已放入自提柜)".to_string());
    }
    if EN_LOCKER.is_match(text) {
        return Some("Pick up parcel from locker".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(text: &str, intent: Intent) -> Option<String> {
        DeterministicExtractor::new()
            .extract(text, intent)
            .unwrap()
            .map(|t| t.title().to_string())
    }

    #[test]
    fn test_credited_amount() {
        let task = DeterministicExtractor::new()
            .extract("Bank: RMB 22,500.00 credited to your account", Intent::FinancialChange)
            .unwrap()
            .unwrap();
        assert_eq!(task.title(), "credited RMB 22,500.00");
        assert_eq!(task.due_at(), None);

        assert_eq!(
            title("You paid USD 30.00 at Coffee Shop", Intent::FinancialChange).as_deref(),
            Some("paid USD 30.00")
        );
        assert_eq!(
            title("【招商银行】您账户到账人民币 8,000.00 元", Intent::FinancialChange).as_deref(),
            Some("到账 8,000.00 元")
        );
        assert_eq!(
            title("工资 12,000.00元已到账", Intent::FinancialChange).as_deref(),
            Some("到账 12,000.00 元")
        );
        assert_eq!(title("余额不足", Intent::FinancialChange), None);
    }

    #[test]
    fn test_verification_code_skips_tail_numbers() {
        assert_eq!(
            title("【抖音】验证码 482913，5分钟内有效", Intent::VerificationCode).as_deref(),
            Some("验证码: 482913")
        );
        assert_eq!(
            title("尾号8899的账户，验证码 5521", Intent::VerificationCode).as_deref(),
            Some("验证码: 5521")
        );
        assert_eq!(
            title("Card ending in 4417: your code is A7K2Q9", Intent::VerificationCode).as_deref(),
            Some("Verification code: A7K2Q9")
        );
        assert_eq!(title("尾号 1234 消费提醒", Intent::VerificationCode), None);
        assert_eq!(title("your code is ready", Intent::VerificationCode), None);
    }

    #[test]
    fn test_missed_call_always_titles() {
        assert_eq!(
            title("未接来电：张三（138 0000 0000）", Intent::MissedCall).as_deref(),
            Some("回拨 张三")
        );
        assert_eq!(
            title("Missed call from Alice Smith, 2 minutes ago", Intent::MissedCall).as_deref(),
            Some("Call back Alice Smith")
        );
        assert_eq!(
            title("Missed call from +1 415 555 0100", Intent::MissedCall).as_deref(),
            Some("Call back +1 415 555 0100")
        );
        assert_eq!(title("您有2个未接来电", Intent::MissedCall).as_deref(), Some("回拨未接来电"));
    }

    #[test]
    fn test_logistics() {
        assert_eq!(
            title("【顺丰】您的快递已放入丰巢柜，取件码 562341", Intent::Logistics).as_deref(),
            Some("取快递/外卖 (取件码: 562341)")
        );
        assert_eq!(
            title("您的包裹已放入菜鸟驿站", Intent::Logistics).as_deref(),
            Some("取快递 (已放入自提柜)")
        );
        assert_eq!(
            title("Your parcel was placed in locker 12. Pickup code: 7731", Intent::Logistics)
                .as_deref(),
            Some("Pick up parcel (code 7731)")
        );
        assert_eq!(title("Your order has shipped", Intent::Logistics), None);
    }

    #[test]
    fn test_generative_intent_is_a_contract_violation() {
        let err = DeterministicExtractor::new()
            .extract("meeting at 3pm", Intent::WorkComms)
            .unwrap_err();
        assert!(matches!(err, SiftError::Contract { .. }));
        assert!(!DeterministicExtractor::handles(Intent::SystemNotice));
        assert!(DeterministicExtractor::handles(Intent::Logistics));
    }
}
