use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::AdvancedDeckSettings;

pub type DeckId = Uuid;
pub type CardId = Uuid;

pub const FACTOR_MIN: i32 = 1300;
pub const FACTOR_MAX: i32 = 5000;
pub const FACTOR_DEFAULT: i32 = 2500;

/// Review interval (days) at or above which a card counts as mature.
pub const MATURE_INTERVAL: i32 = 21;

/// Leech marker, bit 0 of `Card::flags`.
pub const FLAG_LEECH: u32 = 1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    New,
    Learning,
    Review,
    Relearning,
    Suspended,
    Buried,
}

impl CardState {
    /// Fixed state -> queue code mapping used for fast filtering.
    pub fn queue_code(self) -> i8 {
        match self {
            CardState::New => 0,
            CardState::Learning | CardState::Relearning => 1,
            CardState::Review => 2,
            CardState::Suspended => -1,
            CardState::Buried => -2,
        }
    }

    /// States driven by the learning-steps engine rather than SM-2+.
    pub fn in_learning(self) -> bool {
        matches!(
            self,
            CardState::New | CardState::Learning | CardState::Relearning
        )
    }
}

impl std::fmt::Display for CardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CardState::New => "new",
            CardState::Learning => "learning",
            CardState::Review => "review",
            CardState::Relearning => "relearning",
            CardState::Suspended => "suspended",
            CardState::Buried => "buried",
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRating {
    Again,
    Hard,
    Good,
    Easy,
}

impl ReviewRating {
    /// 4-point numeric score (1-4).
    pub fn score(self) -> u8 {
        match self {
            ReviewRating::Again => 1,
            ReviewRating::Hard => 2,
            ReviewRating::Good => 3,
            ReviewRating::Easy => 4,
        }
    }

    pub fn from_score(score: u8) -> Option<Self> {
        match score {
            1 => Some(ReviewRating::Again),
            2 => Some(ReviewRating::Hard),
            3 => Some(ReviewRating::Good),
            4 => Some(ReviewRating::Easy),
            _ => None,
        }
    }

    pub fn all() -> [ReviewRating; 4] {
        [
            ReviewRating::Again,
            ReviewRating::Hard,
            ReviewRating::Good,
            ReviewRating::Easy,
        ]
    }
}

/// The unit of study. Content fields are opaque to the scheduler; the
/// scheduling fields form the state machine described by the crate docs.
///
/// Counters are signed so corrupt persisted values stay representable;
/// `state::validate_card` reports them and `state::repair_card` heals them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: CardId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,

    pub state: CardState,
    /// Redundant integer mirror of `state`, kept consistent via
    /// `CardState::queue_code`.
    pub queue: i8,
    /// For review cards: whole days since the Unix epoch (shifted by the
    /// deck's day-start hour). Unused while in learning states.
    pub due: i64,
    /// Current review interval in whole days.
    pub ivl: i32,
    /// Ease factor, fixed-point per-mille (2500 = 250%).
    pub factor: i32,
    /// Lifetime count of completed reviews, lapses included.
    pub reps: i32,
    /// Lifetime count of Again ratings.
    pub lapses: i32,
    /// Remaining minutes until due while in learning/relearning.
    pub left: i32,
    /// Zero-based index into the active step sequence.
    pub learning_step: i32,
    pub flags: u32,
    /// Snapshot of `due` taken when the card was suspended/buried.
    pub original_due: i64,
    pub original_deck: Option<DeckId>,
    /// Total answer time, milliseconds.
    pub total_study_time: i64,
    /// `total_study_time / reps`, rounded, milliseconds.
    pub average_answer_time: i64,
    /// Deck defaults cached at creation; 0 falls back to deck settings.
    pub graduation_interval: i32,
    pub easy_interval: i32,

    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn new(
        deck_id: DeckId,
        front: impl Into<String>,
        back: impl Into<String>,
        settings: &AdvancedDeckSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            deck_id,
            front: front.into(),
            back: back.into(),
            tags: Vec::new(),
            state: CardState::New,
            queue: CardState::New.queue_code(),
            due: 0,
            ivl: 0,
            factor: settings.new_cards.starting_ease,
            reps: 0,
            lapses: 0,
            left: 0,
            learning_step: 0,
            flags: 0,
            original_due: 0,
            original_deck: None,
            total_study_time: 0,
            average_answer_time: 0,
            graduation_interval: settings.new_cards.graduating_interval,
            easy_interval: settings.new_cards.easy_interval,
            last_reviewed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_leech_flagged(&self) -> bool {
        self.flags & FLAG_LEECH != 0
    }

    /// Effective due instant of a learning/relearning card: `left` minutes
    /// after the answer that queued it. A card with no recorded answer is
    /// due immediately.
    pub fn learn_due_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_reviewed_at {
            Some(at) => at + Duration::minutes(self.left.max(0) as i64),
            None => now,
        }
    }

    /// Folds one answer's elapsed time into the study-time aggregates and
    /// bumps the lifetime review count. Elapsed time is clamped to the
    /// deck's answer cutoff.
    pub(crate) fn record_answer(&mut self, ctx: &SchedulingContext, settings: &AdvancedDeckSettings) {
        let cutoff = i64::from(settings.advanced.max_answer_secs) * 1_000;
        self.total_study_time += ctx.elapsed_ms.clamp(0, cutoff);
        self.reps += 1;
        self.average_answer_time =
            (self.total_study_time as f64 / self.reps as f64).round() as i64;
        self.last_reviewed_at = Some(ctx.now);
    }
}

/// Ephemeral per-call input to a scheduling operation.
#[derive(Clone, Copy, Debug)]
pub struct SchedulingContext {
    pub now: DateTime<Utc>,
    pub elapsed_ms: i64,
}

impl SchedulingContext {
    pub fn new(elapsed_ms: i64) -> Self {
        Self {
            now: Utc::now(),
            elapsed_ms,
        }
    }

    pub fn at(now: DateTime<Utc>, elapsed_ms: i64) -> Self {
        Self { now, elapsed_ms }
    }
}

/// Whole days since the Unix epoch, with the day boundary shifted back by
/// the deck's day-start hour.
pub fn day_number(now: DateTime<Utc>, day_starts_at: u8) -> i64 {
    (now - Duration::hours(i64::from(day_starts_at)))
        .timestamp()
        .div_euclid(86_400)
}

/// Start instant of a given day number (inverse of `day_number`).
pub fn day_instant(day: i64, day_starts_at: u8) -> DateTime<Utc> {
    Utc.timestamp_opt(day * 86_400 + i64::from(day_starts_at) * 3_600, 0)
        .single()
        .expect("day number out of range")
}
