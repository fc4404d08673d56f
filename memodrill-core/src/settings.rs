use serde::{Deserialize, Serialize};

use crate::models::CardState;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NewCardOrder {
    Sequential,
    Random,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeechAction {
    Suspend,
    Tag,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewCardSettings {
    /// Learning steps in minutes; empty falls back to a single 1-minute step.
    pub steps_minutes: Vec<i32>,
    pub order: NewCardOrder,
    pub per_day: u32,
    /// Interval (days) granted when a card graduates from learning.
    pub graduating_interval: i32,
    /// Interval (days) granted on an Easy rating straight out of learning.
    pub easy_interval: i32,
    /// Ease factor assigned at first graduation, per-mille.
    pub starting_ease: i32,
}

impl Default for NewCardSettings {
    fn default() -> Self {
        Self {
            steps_minutes: vec![1, 10],
            order: NewCardOrder::Sequential,
            per_day: 20,
            graduating_interval: 1,
            easy_interval: 4,
            starting_ease: 2500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewSettings {
    pub per_day: u32,
    /// Global multiplier applied to every computed review interval.
    pub interval_modifier: f64,
    /// Extra multiplier on Easy ratings.
    pub easy_bonus: f64,
    /// Multiplier on Hard ratings.
    pub hard_interval: f64,
    pub minimum_interval: i32,
    pub maximum_interval: i32,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            per_day: 200,
            interval_modifier: 1.0,
            easy_bonus: 1.3,
            hard_interval: 1.2,
            minimum_interval: 1,
            maximum_interval: 36_500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LapseSettings {
    /// Relearning steps in minutes; empty falls back to a single 10-minute
    /// step.
    pub steps_minutes: Vec<i32>,
    /// Fraction of the pre-lapse interval kept after a lapse.
    pub new_interval: f64,
    /// Floor for the post-lapse interval, days.
    pub minimum_interval: i32,
    pub leech_threshold: i32,
    pub leech_action: LeechAction,
}

impl Default for LapseSettings {
    fn default() -> Self {
        Self {
            steps_minutes: vec![10],
            new_interval: 0.5,
            minimum_interval: 1,
            leech_threshold: 8,
            leech_action: LeechAction::Suspend,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralSettings {
    /// Hour (0-23) at which the study day rolls over.
    pub day_starts_at: u8,
    /// Answer-time cutoff; elapsed time beyond this is not accumulated.
    pub max_answer_secs: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            day_starts_at: 4,
            max_answer_secs: 60,
        }
    }
}

/// Per-deck configuration, an immutable input to every scheduling
/// operation. `scheduler::optimize_settings` produces a new value rather
/// than mutating one.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdvancedDeckSettings {
    pub new_cards: NewCardSettings,
    pub reviews: ReviewSettings,
    pub lapses: LapseSettings,
    pub advanced: GeneralSettings,
}

impl AdvancedDeckSettings {
    /// Step sequence driving a card in the given state: new-card steps for
    /// new/learning, lapse steps for relearning.
    pub fn steps_for(&self, state: CardState) -> &[i32] {
        match state {
            CardState::Relearning => &self.lapses.steps_minutes,
            _ => &self.new_cards.steps_minutes,
        }
    }
}
