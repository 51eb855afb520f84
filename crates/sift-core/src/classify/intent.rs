//! L2 intent routing.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SharedConfig;
use crate::error::SiftResult;
use crate::traits::{top_category, Category, TextClassifier};
use crate::types::{ExtractionStrategy, Intent};

/// Result of routing one text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntentRoute {
    Classified {
        intent: Intent,
        score: f32,
        strategy: ExtractionStrategy,
    },
    /// No usable classifier output. Routes to Ignore.
    Unclassifiable,
}

impl IntentRoute {
    pub fn intent(&self) -> Option<Intent> {
        match self {
            Self::Classified { intent, .. } => Some(*intent),
            Self::Unclassifiable => None,
        }
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        match self {
            Self::Classified { strategy, .. } => *strategy,
            Self::Unclassifiable => ExtractionStrategy::Ignore,
        }
    }
}

/// Single-label intent router over a closed-label classifier.
pub struct IntentRouter {
    classifier: Option<Arc<dyn TextClassifier>>,
    config: SharedConfig,
}

impl IntentRouter {
    pub fn new(classifier: Option<Arc<dyn TextClassifier>>, config: SharedConfig) -> Self {
        Self { classifier, config }
    }

    /// Classify and look up the extraction strategy. Never fails.
    pub fn route(&self, text: &str) -> IntentRoute {
        let Some(classifier) = self.classifier.as_ref() else {
            warn!("No intent classifier configured, ignoring message");
            return IntentRoute::Unclassifiable;
        };

        let categories = match classifier.classify(text) {
            Ok(categories) => categories,
            Err(e) => {
                warn!(error = %e, "Intent classifier failed, ignoring message");
                return IntentRoute::Unclassifiable;
            }
        };

        let Some(top) = top_category(&categories) else {
            debug!("Intent classifier returned no categories");
            return IntentRoute::Unclassifiable;
        };

        match Intent::from_label(&top.label) {
            Some(intent) => {
                let strategy = self.config.snapshot().routing.strategy(intent);
                debug!(intent = %intent, score = top.score, strategy = %strategy, "Intent routed");
                IntentRoute::Classified {
                    intent,
                    score: top.score,
                    strategy,
                }
            }
            None => {
                warn!(label = %top.label, "Intent classifier produced an unknown label");
                IntentRoute::Unclassifiable
            }
        }
    }
}

/// Keyword-signal intent classifier.
///
/// Used as the L2 model when no packaged intent model is installed.
/// Scores are hit counts normalized to sum to 1; no hits yields no categories.
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentClassifier;

const SIGNALS: &[(Intent, &[&str])] = &[
    (
        Intent::VerificationCode,
        &["验证码", "校验码", "动态码", "verification code", "security code", "one-time", "otp", "passcode"],
    ),
    (Intent::MissedCall, &["未接来电", "来电提醒", "missed call", "tried to call"]),
    (
        Intent::FinancialChange,
        &[
            "到账", "转入", "转出", "支出", "收入", "消费", "余额", "credited", "debited", "balance",
            "transaction", "rmb", "cny", "usd", "payment received",
        ],
    ),
    (
        Intent::Logistics,
        &[
            "快递", "取件码", "取餐码", "包裹", "驿站", "已放入", "派送", "parcel", "package", "delivery",
            "pickup code", "locker", "courier", "shipped",
        ],
    ),
    (
        Intent::SystemNotice,
        &[
            "系统更新", "已连接", "电量", "存储空间", "同步完成", "update available", "battery",
            "storage", "connected", "backup complete",
        ],
    ),
    (
        Intent::Reminder,
        &["提醒", "日程", "预约", "待办", "别忘了", "reminder", "appointment", "don't forget", "calendar"],
    ),
    (
        Intent::WorkComms,
        &[
            "会议", "项目", "同事", "老板", "汇报", "方案", "周报", "请确认", "meeting", "project", "sync",
            "deadline", "report", "please confirm", "colleague",
        ],
    ),
    (
        Intent::ChitChat,
        &["哈哈", "在吗", "吃饭", "聚会", "晚安", "haha", "lol", "dinner", "party", "hang out", "how are you"],
    ),
];

impl TextClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> SiftResult<Vec<Category>> {
        let lower = text.to_lowercase();
        let hits: Vec<(Intent, usize)> = SIGNALS
            .iter()
            .map(|(intent, words)| (*intent, words.iter().filter(|w| lower.contains(*w)).count()))
            .filter(|(_, n)| *n > 0)
            .collect();

        let total: usize = hits.iter().map(|(_, n)| n).sum();
        Ok(hits
            .into_iter()
            .map(|(intent, n)| Category::new(intent.to_string(), n as f32 / total as f32))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SiftError;
    use crate::traits::MockTextClassifier;

    fn keyword_router() -> IntentRouter {
        IntentRouter::new(Some(Arc::new(KeywordIntentClassifier)), SharedConfig::default())
    }

    #[test]
    fn test_keyword_routes() {
        let router = keyword_router();
        let route = router.route("Bank: RMB 22,500.00 credited to your account");
        assert_eq!(route.intent(), Some(Intent::FinancialChange));
        assert_eq!(route.strategy(), ExtractionStrategy::Deterministic);

        let route = router.route("Project sync moved from tomorrow 9am to today 3pm, please confirm");
        assert_eq!(route.intent(), Some(Intent::WorkComms));
        assert_eq!(route.strategy(), ExtractionStrategy::Generative);

        let route = router.route("【顺丰】您的快递已放入丰巢柜，取件码 562341");
        assert_eq!(route.intent(), Some(Intent::Logistics));
    }

    #[test]
    fn test_no_signal_is_unclassifiable() {
        let route = keyword_router().route("zzz");
        assert_eq!(route, IntentRoute::Unclassifiable);
        assert_eq!(route.strategy(), ExtractionStrategy::Ignore);
    }

    #[test]
    fn test_classifier_failure_routes_to_ignore() {
        let mut mock = MockTextClassifier::new();
        mock.expect_classify()
            .returning(|_| Err(SiftError::model_unavailable("intent model missing")));
        let router = IntentRouter::new(Some(Arc::new(mock)), SharedConfig::default());
        assert_eq!(router.route("anything").strategy(), ExtractionStrategy::Ignore);

        let none = IntentRouter::new(None, SharedConfig::default());
        assert_eq!(none.route("anything"), IntentRoute::Unclassifiable);
    }

    #[test]
    fn test_chinese_model_labels_and_config_routing() {
        let mut mock = MockTextClassifier::new();
        mock.expect_classify().returning(|_| {
            Ok(vec![Category::new("社交闲聊", 0.9), Category::new("工作沟通", 0.1)])
        });
        let config = SharedConfig::default();
        let router = IntentRouter::new(Some(Arc::new(mock)), config.clone());
        assert_eq!(router.route("在吗").strategy(), ExtractionStrategy::Generative);

        config.update(|c| {
            c.routing = c
                .routing
                .clone()
                .with_route(Intent::ChitChat, ExtractionStrategy::Ignore)
        });
        assert_eq!(router.route("在吗").strategy(), ExtractionStrategy::Ignore);
    }
}
