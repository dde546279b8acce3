use serde::{Deserialize, Serialize};

/// Per-instance hint controlling whether the instance may be chosen as a
/// promotion candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionRule {
    Must,

    Prefer,

    #[default]
    Neutral,

    PreferNot,

    MustNot,
}

impl PromotionRule {
    /// Smaller is better when ordering candidates.
    pub fn preference_order(&self) -> i32 {
        match self {
            PromotionRule::Must => 0,
            PromotionRule::Prefer => 1,
            PromotionRule::Neutral => 2,
            PromotionRule::PreferNot => 3,
            PromotionRule::MustNot => 4,
        }
    }

    pub fn is_banned(&self) -> bool {
        matches!(self, PromotionRule::MustNot)
    }
}
