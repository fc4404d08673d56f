use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;
use crate::models::{day_number, Card, CardState, DeckId, FACTOR_DEFAULT, FACTOR_MAX, FACTOR_MIN};
use crate::settings::AdvancedDeckSettings;

/// Outcome of a card integrity check. Errors make the card unschedulable;
/// warnings are advisory and never block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
        self.is_valid = false;
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Checks a single card against the structural invariants: content present,
/// state/queue mapping intact, counters non-negative. Ease and leech issues
/// are reported as warnings because `repair_card` can heal them.
pub fn validate_card(card: &Card, settings: &AdvancedDeckSettings) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if card.id.is_nil() {
        result.error("card id is nil");
    }
    if card.front.trim().is_empty() {
        result.error("front content is empty");
    }
    if card.back.trim().is_empty() {
        result.error("back content is empty");
    }
    if card.queue != card.state.queue_code() {
        result.error(format!(
            "inconsistent state-queue combination: {} with queue {}",
            card.state, card.queue
        ));
    }
    for (name, value) in [
        ("ivl", card.ivl),
        ("reps", card.reps),
        ("lapses", card.lapses),
        ("left", card.left),
        ("learning_step", card.learning_step),
    ] {
        if value < 0 {
            result.error(format!("negative {name}: {value}"));
        }
    }

    if card.factor != 0 && !(FACTOR_MIN..=FACTOR_MAX).contains(&card.factor) {
        result.warn(format!("ease factor out of range: {}", card.factor));
    }
    if card.lapses >= settings.lapses.leech_threshold
        && card.state != CardState::Suspended
        && !card.is_leech_flagged()
    {
        result.warn(format!(
            "lapse count {} at or beyond leech threshold {}",
            card.lapses, settings.lapses.leech_threshold
        ));
    }
    if card.state == CardState::New && card.reps > 0 {
        result.warn(format!("new card has {} recorded reviews", card.reps));
    }

    result
}

/// Validates a batch, prefixing every message with the offending card id.
pub fn validate_cards(cards: &[Card], settings: &AdvancedDeckSettings) -> ValidationResult {
    let mut combined = ValidationResult::ok();
    for card in cards {
        let result = validate_card(card, settings);
        for msg in result.errors {
            combined.error(format!("{}: {msg}", card.id));
        }
        for msg in result.warnings {
            combined.warn(format!("{}: {msg}", card.id));
        }
    }
    combined
}

#[derive(Clone, Debug)]
pub struct StateTransition {
    pub card: Card,
    pub from: CardState,
    pub to: CardState,
}

/// Forces a card into the target state, fixing up the scheduling fields the
/// state machine expects there. Rejects structurally invalid cards; run
/// `repair_card` first for those.
pub fn transition_card(
    card: &Card,
    target: CardState,
    settings: &AdvancedDeckSettings,
    now: DateTime<Utc>,
) -> Result<StateTransition, SchedulerError> {
    let check = validate_card(card, settings);
    if !check.is_valid {
        return Err(SchedulerError::InvalidCard(check.errors.join("; ")));
    }

    let from = card.state;
    let mut card = card.clone();
    let today = day_number(now, settings.advanced.day_starts_at);

    match target {
        CardState::New => {
            card.state = CardState::New;
            card.due = 0;
            card.ivl = 0;
            card.factor = settings.new_cards.starting_ease;
            card.reps = 0;
            card.lapses = 0;
            card.left = 0;
            card.learning_step = 0;
            card.original_due = 0;
            card.last_reviewed_at = None;
        }
        CardState::Learning => {
            card.state = CardState::Learning;
            card.learning_step = 0;
            card.left = *settings.new_cards.steps_minutes.first().unwrap_or(&1);
        }
        CardState::Review => {
            card.state = CardState::Review;
            if from == CardState::Relearning {
                // The post-lapse interval is already on the card.
                card.ivl = card.ivl.max(settings.lapses.minimum_interval);
            } else if card.ivl <= 0 {
                card.ivl = if card.graduation_interval > 0 {
                    card.graduation_interval
                } else {
                    settings.new_cards.graduating_interval
                };
            }
            if card.factor < FACTOR_MIN {
                card.factor = settings.new_cards.starting_ease;
            }
            card.due = today + i64::from(card.ivl);
            card.left = 0;
            card.learning_step = 0;
        }
        CardState::Relearning => {
            card.state = CardState::Relearning;
            card.learning_step = 0;
            card.left = *settings.lapses.steps_minutes.first().unwrap_or(&10);
        }
        CardState::Suspended => {
            card.original_due = card.due;
            card.due = 0;
            card.state = CardState::Suspended;
        }
        CardState::Buried => {
            card.original_due = card.due;
            card.due = today + 1;
            card.state = CardState::Buried;
        }
    }
    card.queue = card.state.queue_code();

    Ok(StateTransition { card, from, to: target })
}

/// Pre-schema card image as persisted by earlier releases: camelCase keys,
/// floating-point ease, string timestamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyCard {
    pub id: String,
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    /// SM-2 ease as a plain multiplier (2.5 = 250%).
    pub ease_factor: f64,
    pub interval_days: i64,
    pub review_count: i64,
    pub lapse_count: i64,
    pub created_at: String,
}

impl Default for LegacyCard {
    fn default() -> Self {
        Self {
            id: String::new(),
            front: String::new(),
            back: String::new(),
            tags: Vec::new(),
            ease_factor: 2.5,
            interval_days: 0,
            review_count: 0,
            lapse_count: 0,
            created_at: String::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MigratedCard {
    pub card: Card,
    /// Human-readable record of every heuristic the migration applied.
    pub notes: Vec<String>,
}

/// Best-effort migration of a legacy image into the current schema. Never
/// fails: every unusable field is replaced with a sane value and noted.
pub fn migrate_card(
    legacy: &LegacyCard,
    deck_id: DeckId,
    settings: &AdvancedDeckSettings,
    now: DateTime<Utc>,
) -> MigratedCard {
    let mut notes = Vec::new();

    let id = match Uuid::parse_str(&legacy.id) {
        Ok(id) if !id.is_nil() => id,
        _ => {
            notes.push(format!("unusable id {:?}, generated a new one", legacy.id));
            Uuid::new_v4()
        }
    };

    let created_at = match DateTime::parse_from_rfc3339(&legacy.created_at) {
        Ok(at) => at.with_timezone(&Utc),
        Err(_) => {
            notes.push(format!(
                "unparseable createdAt {:?}, using migration time",
                legacy.created_at
            ));
            now
        }
    };

    if legacy.review_count < 0 {
        notes.push(format!("negative reviewCount {}, clamped to 0", legacy.review_count));
    }
    if legacy.lapse_count < 0 {
        notes.push(format!("negative lapseCount {}, clamped to 0", legacy.lapse_count));
    }
    if legacy.interval_days < 0 {
        notes.push(format!("negative intervalDays {}, clamped to 0", legacy.interval_days));
    }

    // Any completed review means the card resumes in the review state, due
    // today. Everything else restarts from scratch.
    let (state, factor, reps, lapses, ivl, due) = if legacy.review_count > 0 {
        let factor = if legacy.ease_factor > 0.0 {
            ((legacy.ease_factor * 1000.0).round() as i32).clamp(FACTOR_MIN, FACTOR_MAX)
        } else {
            notes.push(format!(
                "non-positive easeFactor {}, using default",
                legacy.ease_factor
            ));
            FACTOR_DEFAULT
        };
        notes.push("migrated as a review card based on reviewCount > 0".into());
        (
            CardState::Review,
            factor,
            legacy.review_count.clamp(0, i64::from(i32::MAX)) as i32,
            legacy.lapse_count.clamp(0, i64::from(i32::MAX)) as i32,
            legacy.interval_days.clamp(1, i64::from(i32::MAX)) as i32,
            day_number(now, settings.advanced.day_starts_at),
        )
    } else {
        (CardState::New, FACTOR_DEFAULT, 0, 0, 0, 0)
    };

    if legacy.front.trim().is_empty() {
        notes.push("front content is empty".into());
    }
    if legacy.back.trim().is_empty() {
        notes.push("back content is empty".into());
    }

    let card = Card {
        id,
        deck_id,
        front: legacy.front.clone(),
        back: legacy.back.clone(),
        tags: legacy.tags.clone(),
        state,
        queue: state.queue_code(),
        due,
        ivl,
        factor,
        reps,
        lapses,
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
        created_at,
    };

    MigratedCard { card, notes }
}

#[derive(Clone, Debug)]
pub struct RepairOutcome {
    pub card: Card,
    pub repairs: Vec<String>,
}

/// Normalizes a card back into a consistent shape: clamps counters and ease,
/// reconciles state with review history, resyncs the queue code. Idempotent;
/// a clean card comes back value-equal.
pub fn repair_card(card: &Card, settings: &AdvancedDeckSettings) -> RepairOutcome {
    let mut card = card.clone();
    let mut repairs = Vec::new();

    fn clamp_counter(value: &mut i32, name: &str, repairs: &mut Vec<String>) {
        if *value < 0 {
            repairs.push(format!("clamped negative {name} {value} to 0"));
            *value = 0;
        }
    }
    clamp_counter(&mut card.ivl, "ivl", &mut repairs);
    clamp_counter(&mut card.reps, "reps", &mut repairs);
    clamp_counter(&mut card.lapses, "lapses", &mut repairs);
    clamp_counter(&mut card.left, "left", &mut repairs);
    clamp_counter(&mut card.learning_step, "learning_step", &mut repairs);

    if card.factor != 0 && card.factor < FACTOR_MIN {
        repairs.push(format!("raised ease factor {} to {FACTOR_MIN}", card.factor));
        card.factor = FACTOR_MIN;
    } else if card.factor > FACTOR_MAX {
        repairs.push(format!("lowered ease factor {} to {FACTOR_MAX}", card.factor));
        card.factor = FACTOR_MAX;
    }
    if card.factor == 0 {
        repairs.push("seeded missing ease factor with the deck default".into());
        card.factor = settings.new_cards.starting_ease;
    }

    if card.state == CardState::New && card.reps > 0 {
        repairs.push(format!(
            "new card with {} reviews promoted to review state",
            card.reps
        ));
        card.state = CardState::Review;
        card.ivl = card.ivl.max(1);
    } else if card.state == CardState::Review && card.reps == 0 {
        repairs.push("review card with no reviews demoted to new state".into());
        card.state = CardState::New;
        card.ivl = 0;
        card.due = 0;
        card.left = 0;
        card.learning_step = 0;
    }

    if card.queue != card.state.queue_code() {
        repairs.push(format!(
            "resynced queue {} to {} for state {}",
            card.queue,
            card.state.queue_code(),
            card.state
        ));
        card.queue = card.state.queue_code();
    }

    if !repairs.is_empty() {
        info!("repaired card {}: {}", card.id, repairs.join("; "));
    }

    RepairOutcome { card, repairs }
}
