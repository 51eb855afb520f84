//! Closed label sets: priority, intent and extraction strategy.
//!
//! Labels serialize to snake_case. The Chinese labels used by packaged
//! models and legacy datasets are accepted on input.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Priority assigned by the L1 gate.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PriorityLabel {
    #[serde(alias = "高优先级", alias = "高")]
    High,
    #[serde(alias = "中优先级", alias = "中")]
    Medium,
    /// Includes the legacy spam label, which folds into Low.
    #[serde(alias = "低优先级", alias = "低优先级/垃圾", alias = "低", alias = "spam")]
    Low,
}

impl PriorityLabel {
    /// All labels in scorer output order.
    pub const ALL: [PriorityLabel; 3] = [Self::High, Self::Medium, Self::Low];

    /// Position of this label in a scorer distribution.
    pub fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    /// Label at a distribution index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Parse a label from any of its known spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        match label {
            "高优先级" | "高" => return Some(Self::High),
            "中优先级" | "中" => return Some(Self::Medium),
            "低优先级" | "低优先级/垃圾" | "低" | "垃圾" => return Some(Self::Low),
            _ => {}
        }
        match label.to_ascii_lowercase().as_str() {
            "high" | "urgent" => Some(Self::High),
            "medium" | "normal" => Some(Self::Medium),
            "low" | "spam" | "low/spam" => Some(Self::Low),
            _ => None,
        }
    }

    /// Chinese label used by packaged models.
    pub fn zh(self) -> &'static str {
        match self {
            Self::High => "高优先级",
            Self::Medium => "中优先级",
            Self::Low => "低优先级",
        }
    }

    /// Whether messages with this label enter the scheduler.
    pub fn is_admitted(self) -> bool {
        !matches!(self, Self::Low)
    }
}

/// Intent assigned by the L2 router.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[serde(alias = "财务变动")]
    FinancialChange,
    #[serde(alias = "工作沟通")]
    WorkComms,
    #[serde(alias = "物流信息")]
    Logistics,
    #[serde(alias = "验证码")]
    VerificationCode,
    #[serde(alias = "系统通知")]
    SystemNotice,
    #[serde(alias = "未接来电")]
    MissedCall,
    #[serde(alias = "日程提醒")]
    Reminder,
    #[serde(alias = "社交闲聊")]
    ChitChat,
}

impl Intent {
    /// Parse an intent from snake_case, kebab-case or its Chinese label.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if let Some(intent) = Self::iter().find(|i| i.zh() == label) {
            return Some(intent);
        }
        let normalized = label.to_ascii_lowercase().replace(['-', ' '], "_");
        normalized.parse().ok()
    }

    /// Chinese label used by packaged models.
    pub fn zh(self) -> &'static str {
        match self {
            Self::FinancialChange => "财务变动",
            Self::WorkComms => "工作沟通",
            Self::Logistics => "物流信息",
            Self::VerificationCode => "验证码",
            Self::SystemNotice => "系统通知",
            Self::MissedCall => "未接来电",
            Self::Reminder => "日程提醒",
            Self::ChitChat => "社交闲聊",
        }
    }

    /// All snake_case names, in declaration order.
    pub fn all_names() -> Vec<&'static str> {
        Self::iter().map(|i| i.into()).collect()
    }
}

/// Extraction tier that handles an intent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Deterministic,
    Generative,
    Ignore,
}

/// Static intent to strategy mapping.
///
/// A configured table overlays the defaults, so it only needs the
/// intents it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "HashMap<Intent, ExtractionStrategy>",
    into = "HashMap<Intent, ExtractionStrategy>"
)]
pub struct RoutingTable {
    routes: HashMap<Intent, ExtractionStrategy>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        use ExtractionStrategy::*;
        let routes = Intent::iter()
            .map(|intent| {
                let strategy = match intent {
                    Intent::VerificationCode
                    | Intent::MissedCall
                    | Intent::FinancialChange
                    | Intent::Logistics => Deterministic,
                    Intent::WorkComms | Intent::Reminder | Intent::ChitChat => Generative,
                    Intent::SystemNotice => Ignore,
                };
                (intent, strategy)
            })
            .collect();
        Self { routes }
    }
}

impl From<HashMap<Intent, ExtractionStrategy>> for RoutingTable {
    fn from(overrides: HashMap<Intent, ExtractionStrategy>) -> Self {
        let mut table = Self::default();
        table.routes.extend(overrides);
        table
    }
}

impl From<RoutingTable> for HashMap<Intent, ExtractionStrategy> {
    fn from(table: RoutingTable) -> Self {
        table.routes
    }
}

impl RoutingTable {
    /// Strategy for an intent.
    pub fn strategy(&self, intent: Intent) -> ExtractionStrategy {
        self.routes
            .get(&intent)
            .copied()
            .unwrap_or(ExtractionStrategy::Ignore)
    }

    /// Override the strategy for one intent.
    pub fn with_route(mut self, intent: Intent, strategy: ExtractionStrategy) -> Self {
        self.routes.insert(intent, strategy);
        self
    }
}
