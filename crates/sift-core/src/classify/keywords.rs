//! Keyword-count priority heuristic, used when no scorer is available.

use crate::types::PriorityLabel;

const HIGH_KEYWORDS: &[&str] = &[
    "验证码", "紧急", "马上", "立即", "尽快", "截止", "会议", "老板", "未接来电", "逾期",
    "urgent", "asap", "immediately", "deadline", "meeting", "verification", "otp", "overdue",
    "missed call", "action required",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "快递", "取件", "物流", "账单", "到账", "提醒", "回复", "日程", "预约", "付款",
    "delivery", "parcel", "package", "invoice", "reminder", "reply", "appointment", "payment",
    "credited", "debited",
];

const LOW_KEYWORDS: &[&str] = &[
    "优惠", "促销", "红包", "广告", "订阅", "抽奖", "折扣", "推荐", "秒杀", "福利",
    "sale", "discount", "promo", "newsletter", "unsubscribe", "coupon", "deal", "offer",
    "recommended", "giveaway",
];

fn hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

/// Label with the most keyword hits. Ties favor the higher priority;
/// no hits at all means Low.
pub fn keyword_priority(text: &str) -> PriorityLabel {
    let lower = text.to_lowercase();
    let scores = [
        (PriorityLabel::High, hits(&lower, HIGH_KEYWORDS)),
        (PriorityLabel::Medium, hits(&lower, MEDIUM_KEYWORDS)),
        (PriorityLabel::Low, hits(&lower, LOW_KEYWORDS)),
    ];

    let mut best = (PriorityLabel::Low, 0);
    for (label, count) in scores {
        if count > best.1 {
            best = (label, count);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_priority() {
        assert_eq!(keyword_priority("URGENT: meeting moved"), PriorityLabel::High);
        assert_eq!(keyword_priority("您的快递已到取件点"), PriorityLabel::Medium);
        assert_eq!(keyword_priority("限时优惠，红包抢不停"), PriorityLabel::Low);
        assert_eq!(keyword_priority("hello there"), PriorityLabel::Low);
    }

    #[test]
    fn test_ties_favor_higher_priority() {
        assert_eq!(keyword_priority("meeting about the sale"), PriorityLabel::High);
    }
}
