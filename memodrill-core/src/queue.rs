use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::{Deserialize, Serialize};

use crate::models::{day_instant, day_number, Card, CardState, DeckId, MATURE_INTERVAL};
use crate::settings::{AdvancedDeckSettings, NewCardOrder};

/// Estimated answer cost per category, seconds.
const SECS_NEW: usize = 30;
const SECS_LEARNING: usize = 15;
const SECS_RELEARNING: usize = 20;
const SECS_REVIEW: usize = 10;

/// What one deck has already studied today.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyLimits {
    pub new_studied: u32,
    pub reviews_studied: u32,
    /// Learning/relearning answers; tracked for statistics, never capped.
    pub learning_studied: u32,
    pub study_time_ms: i64,
    /// When this counter set was last zeroed; drives day-rollover detection.
    pub reset_at: DateTime<Utc>,
}

impl DailyLimits {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            new_studied: 0,
            reviews_studied: 0,
            learning_studied: 0,
            study_time_ms: 0,
            reset_at: now,
        }
    }
}

/// Per-deck daily study counters, owned and persisted by the caller rather
/// than hidden inside the queue builder.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DailyLimitsStore {
    decks: HashMap<DeckId, DailyLimits>,
}

impl DailyLimitsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(&self, deck_id: DeckId) -> Option<&DailyLimits> {
        self.decks.get(&deck_id)
    }

    fn entry(&mut self, deck_id: DeckId, now: DateTime<Utc>) -> &mut DailyLimits {
        self.decks
            .entry(deck_id)
            .or_insert_with(|| DailyLimits::fresh(now))
    }

    /// Records one answered card against the deck's counters. Pass the card
    /// as it was before the answer; its state decides which cap it consumed.
    pub fn record_study(
        &mut self,
        deck_id: DeckId,
        card: &Card,
        elapsed_ms: i64,
        now: DateTime<Utc>,
    ) {
        let limits = self.entry(deck_id, now);
        match card.state {
            CardState::New => limits.new_studied += 1,
            CardState::Review => limits.reviews_studied += 1,
            CardState::Learning | CardState::Relearning => limits.learning_studied += 1,
            CardState::Suspended | CardState::Buried => {}
        }
        limits.study_time_ms += elapsed_ms.max(0);
    }

    pub fn reset_deck(&mut self, deck_id: DeckId, now: DateTime<Utc>) {
        self.decks.insert(deck_id, DailyLimits::fresh(now));
    }

    pub fn reset_all(&mut self) {
        self.decks.clear();
    }

    /// True when any tracked deck's counters were last reset before the
    /// current study day began, i.e. the caller should reset before building
    /// queues.
    pub fn day_rollover_pending(&self, settings: &AdvancedDeckSettings, now: DateTime<Utc>) -> bool {
        let hour = settings.advanced.day_starts_at;
        let day_start = day_instant(day_number(now, hour), hour);
        self.decks.values().any(|l| l.reset_at < day_start)
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub new: usize,
    pub learning: usize,
    pub relearning: usize,
    pub review_young: usize,
    pub review_mature: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.new + self.learning + self.relearning + self.review_young + self.review_mature
    }
}

/// How many more new/review cards today's caps still allow.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemainingLimits {
    pub new: u32,
    pub reviews: u32,
}

/// One deck's study queue for the current moment: bucketed cards, tallies,
/// remaining allowances, and a forecast of when the next card comes due.
#[derive(Clone, Debug)]
pub struct StudyQueue {
    pub deck_id: DeckId,
    pub new: Vec<Card>,
    pub learning: Vec<Card>,
    pub relearning: Vec<Card>,
    pub review: Vec<Card>,
    pub counts: QueueCounts,
    pub remaining: RemainingLimits,
    /// Whole-minute estimate for clearing the queue.
    pub estimated_minutes: u32,
    /// Earliest instant a currently-undue card becomes due, if any.
    pub next_card_due: Option<DateTime<Utc>>,
}

/// Builds the study queue for one deck. Suspended and buried cards never
/// enter; new and review buckets are capped by what the daily limits still
/// allow. The caller keeps the limits store across calls within a day.
pub fn build_study_queue(
    deck_id: DeckId,
    cards: &[Card],
    settings: &AdvancedDeckSettings,
    limits: &mut DailyLimitsStore,
    now: DateTime<Utc>,
) -> StudyQueue {
    let today = day_number(now, settings.advanced.day_starts_at);
    let studied = *limits.entry(deck_id, now);
    let remaining = RemainingLimits {
        new: settings.new_cards.per_day.saturating_sub(studied.new_studied),
        reviews: settings
            .reviews
            .per_day
            .saturating_sub(studied.reviews_studied),
    };

    let mut new = Vec::new();
    let mut learning = Vec::new();
    let mut relearning = Vec::new();
    let mut review = Vec::new();
    let mut next_due: Option<DateTime<Utc>> = None;
    let mut push_next_due = |candidate: DateTime<Utc>| {
        next_due = Some(match next_due {
            Some(current) => current.min(candidate),
            None => candidate,
        });
    };

    for card in cards.iter().filter(|c| c.deck_id == deck_id) {
        match card.state {
            CardState::New => new.push(card.clone()),
            CardState::Learning | CardState::Relearning => {
                let due_at = card.learn_due_at(now);
                if due_at <= now {
                    if card.state == CardState::Learning {
                        learning.push(card.clone());
                    } else {
                        relearning.push(card.clone());
                    }
                } else {
                    push_next_due(due_at);
                }
            }
            CardState::Review => {
                if card.due <= today {
                    review.push(card.clone());
                } else {
                    push_next_due(day_instant(card.due, settings.advanced.day_starts_at));
                }
            }
            CardState::Suspended | CardState::Buried => {}
        }
    }

    // Caps apply before ordering; learning buckets are never capped.
    new.truncate(remaining.new as usize);
    review.truncate(remaining.reviews as usize);
    if settings.new_cards.order == NewCardOrder::Random {
        new.shuffle(&mut thread_rng());
    } else {
        new.sort_by(|a, b| (a.due, a.created_at).cmp(&(b.due, b.created_at)));
    }
    learning.sort_by_key(|c| c.learn_due_at(now));
    relearning.sort_by_key(|c| c.learn_due_at(now));
    review.sort_by_key(|c| c.due);

    let counts = QueueCounts {
        new: new.len(),
        learning: learning.len(),
        relearning: relearning.len(),
        review_young: review.iter().filter(|c| c.ivl < MATURE_INTERVAL).count(),
        review_mature: review.iter().filter(|c| c.ivl >= MATURE_INTERVAL).count(),
    };
    let estimated_secs = counts.new * SECS_NEW
        + counts.learning * SECS_LEARNING
        + counts.relearning * SECS_RELEARNING
        + (counts.review_young + counts.review_mature) * SECS_REVIEW;
    let estimated_minutes = estimated_secs.div_ceil(60) as u32;

    debug!(
        "deck {deck_id} queue: {} new, {} learning, {} relearning, {} review",
        counts.new,
        counts.learning,
        counts.relearning,
        counts.review_young + counts.review_mature,
    );

    StudyQueue {
        deck_id,
        new,
        learning,
        relearning,
        review,
        counts,
        remaining,
        estimated_minutes,
        next_card_due: next_due,
    }
}

/// Picks the next card to show: learning steps first, then relearning, then
/// reviews, then new cards, with the latter two gated by today's allowance.
pub fn next_card(queue: &StudyQueue) -> Option<&Card> {
    if let Some(card) = queue.learning.first() {
        return Some(card);
    }
    if let Some(card) = queue.relearning.first() {
        return Some(card);
    }
    if queue.remaining.reviews > 0 {
        if let Some(card) = queue.review.first() {
            return Some(card);
        }
    }
    if queue.remaining.new > 0 {
        if let Some(card) = queue.new.first() {
            return Some(card);
        }
    }
    None
}

/// Hides a card until tomorrow, keeping its real due date aside.
pub fn bury_card(card: &Card, settings: &AdvancedDeckSettings, now: DateTime<Utc>) -> Card {
    let mut card = card.clone();
    card.original_due = card.due;
    card.due = day_number(now, settings.advanced.day_starts_at) + 1;
    card.state = CardState::Buried;
    card.queue = card.state.queue_code();
    card
}

/// Takes a card out of study indefinitely, keeping its real due date aside.
pub fn suspend_card(card: &Card) -> Card {
    let mut card = card.clone();
    card.original_due = card.due;
    card.due = 0;
    card.state = CardState::Suspended;
    card.queue = card.state.queue_code();
    card
}

fn restore_card(card: &Card, settings: &AdvancedDeckSettings, now: DateTime<Utc>) -> Card {
    let mut card = card.clone();
    card.state = if card.reps == 0 {
        CardState::New
    } else {
        CardState::Review
    };
    card.due = if card.original_due != 0 {
        card.original_due
    } else {
        day_number(now, settings.advanced.day_starts_at)
    };
    card.original_due = 0;
    card.queue = card.state.queue_code();
    card
}

/// Returns a suspended card to circulation. Cards in any other state come
/// back unchanged.
pub fn unsuspend_card(card: &Card, settings: &AdvancedDeckSettings, now: DateTime<Utc>) -> Card {
    if card.state != CardState::Suspended {
        return card.clone();
    }
    restore_card(card, settings, now)
}

/// Returns every buried card in the slice to circulation.
pub fn unbury_cards(cards: &[Card], settings: &AdvancedDeckSettings, now: DateTime<Utc>) -> Vec<Card> {
    cards
        .iter()
        .map(|card| {
            if card.state == CardState::Buried {
                restore_card(card, settings, now)
            } else {
                card.clone()
            }
        })
        .collect()
}

/// Buried cards whose bury period has elapsed, i.e. candidates for the
/// day-rollover unbury pass.
pub fn buried_due<'a>(
    cards: &'a [Card],
    settings: &AdvancedDeckSettings,
    now: DateTime<Utc>,
) -> Vec<&'a Card> {
    let today = day_number(now, settings.advanced.day_starts_at);
    cards
        .iter()
        .filter(|c| c.state == CardState::Buried && c.due <= today)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn settings() -> AdvancedDeckSettings {
        AdvancedDeckSettings::default()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn new_card(deck: DeckId) -> Card {
        Card::new(deck, "q", "a", &settings())
    }

    fn review_card(deck: DeckId, due_offset: i64, ivl: i32) -> Card {
        let mut c = new_card(deck);
        c.state = CardState::Review;
        c.queue = 2;
        c.reps = 3;
        c.ivl = ivl;
        c.due = day_number(at(), 4) + due_offset;
        c
    }

    fn learning_card(deck: DeckId, minutes_ago: i64) -> Card {
        let mut c = new_card(deck);
        c.state = CardState::Learning;
        c.queue = 1;
        c.reps = 1;
        c.left = 10;
        c.last_reviewed_at = Some(at() - Duration::minutes(10 + minutes_ago));
        c
    }

    #[test]
    fn queue_buckets_by_due_predicates() {
        let deck = Uuid::new_v4();
        let cards = vec![
            new_card(deck),
            learning_card(deck, 0),
            review_card(deck, 0, 10),
            review_card(deck, 1, 10),
            suspend_card(&review_card(deck, 0, 10)),
        ];
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &settings(), &mut limits, at());
        assert_eq!(q.counts.new, 1);
        assert_eq!(q.counts.learning, 1);
        assert_eq!(q.counts.review_young, 1);
        assert_eq!(q.counts.total(), 3);
        // The undue review card feeds the forecast instead.
        assert_eq!(
            q.next_card_due,
            Some(day_instant(day_number(at(), 4) + 1, 4))
        );
    }

    #[test]
    fn learning_cards_not_yet_due_stay_out() {
        let deck = Uuid::new_v4();
        let mut pending = learning_card(deck, 0);
        pending.last_reviewed_at = Some(at() - Duration::minutes(3));
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &[pending], &settings(), &mut limits, at());
        assert_eq!(q.counts.learning, 0);
        assert_eq!(q.next_card_due, Some(at() + Duration::minutes(7)));
    }

    #[test]
    fn daily_caps_truncate_new_and_review() {
        let deck = Uuid::new_v4();
        let mut s = settings();
        s.new_cards.per_day = 2;
        s.reviews.per_day = 1;
        let cards = vec![
            new_card(deck),
            new_card(deck),
            new_card(deck),
            review_card(deck, -1, 5),
            review_card(deck, 0, 5),
        ];
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &s, &mut limits, at());
        assert_eq!(q.counts.new, 2);
        assert_eq!(q.counts.review_young, 1);
        // The cut happens in collection order, ahead of sorting.
        assert_eq!(q.review[0].due, day_number(at(), 4) - 1);
    }

    #[test]
    fn record_study_consumes_the_allowance() {
        let deck = Uuid::new_v4();
        let mut s = settings();
        s.new_cards.per_day = 1;
        let mut limits = DailyLimitsStore::new();
        let card = new_card(deck);
        limits.record_study(deck, &card, 4_000, at());
        let q = build_study_queue(deck, &[new_card(deck)], &s, &mut limits, at());
        assert_eq!(q.remaining.new, 0);
        assert_eq!(q.counts.new, 0);
        assert_eq!(limits.limits(deck).unwrap().study_time_ms, 4_000);
    }

    #[test]
    fn learning_answers_do_not_consume_caps() {
        let deck = Uuid::new_v4();
        let mut limits = DailyLimitsStore::new();
        limits.record_study(deck, &learning_card(deck, 0), 2_000, at());
        let l = limits.limits(deck).unwrap();
        assert_eq!(l.new_studied, 0);
        assert_eq!(l.reviews_studied, 0);
        assert_eq!(l.learning_studied, 1);
        assert_eq!(l.study_time_ms, 2_000);
    }

    #[test]
    fn next_card_priority_is_learning_first() {
        let deck = Uuid::new_v4();
        let cards = vec![
            new_card(deck),
            review_card(deck, 0, 10),
            learning_card(deck, 0),
        ];
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &settings(), &mut limits, at());
        assert_eq!(next_card(&q).unwrap().state, CardState::Learning);
    }

    #[test]
    fn next_card_respects_exhausted_allowances() {
        let deck = Uuid::new_v4();
        let mut s = settings();
        s.new_cards.per_day = 0;
        s.reviews.per_day = 0;
        let cards = vec![new_card(deck), review_card(deck, 0, 10)];
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &s, &mut limits, at());
        assert!(next_card(&q).is_none());
    }

    #[test]
    fn random_order_keeps_the_same_cards() {
        let deck = Uuid::new_v4();
        let mut s = settings();
        s.new_cards.order = NewCardOrder::Random;
        let cards: Vec<Card> = (0..5).map(|_| new_card(deck)).collect();
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &s, &mut limits, at());
        assert_eq!(q.counts.new, 5);
        for card in &cards {
            assert!(q.new.iter().any(|c| c.id == card.id));
        }
    }

    #[test]
    fn rollover_pending_after_the_day_boundary() {
        let deck = Uuid::new_v4();
        let s = settings();
        let yesterday = at() - Duration::days(1);
        let mut limits = DailyLimitsStore::new();
        limits.record_study(deck, &new_card(deck), 1_000, yesterday);
        assert!(limits.day_rollover_pending(&s, at()));

        limits.reset_deck(deck, at());
        assert!(!limits.day_rollover_pending(&s, at()));

        // Same calendar day, before and after the 4am boundary.
        let early = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        let mut limits = DailyLimitsStore::new();
        limits.record_study(deck, &new_card(deck), 1_000, early);
        assert!(limits.day_rollover_pending(&s, at()));
    }

    #[test]
    fn reset_all_clears_every_deck() {
        let mut limits = DailyLimitsStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        limits.record_study(a, &new_card(a), 0, at());
        limits.record_study(b, &new_card(b), 0, at());
        limits.reset_all();
        assert!(limits.limits(a).is_none());
        assert!(limits.limits(b).is_none());
    }

    #[test]
    fn suspend_and_unsuspend_round_trip() {
        let deck = Uuid::new_v4();
        let card = review_card(deck, 3, 10);
        let original_due = card.due;
        let suspended = suspend_card(&card);
        assert_eq!(suspended.state, CardState::Suspended);
        assert_eq!(suspended.due, 0);
        let restored = unsuspend_card(&suspended, &settings(), at());
        assert_eq!(restored.state, CardState::Review);
        assert_eq!(restored.due, original_due);
        assert_eq!(restored.original_due, 0);
    }

    #[test]
    fn unsuspending_a_never_reviewed_card_restores_new() {
        let deck = Uuid::new_v4();
        let suspended = suspend_card(&new_card(deck));
        let restored = unsuspend_card(&suspended, &settings(), at());
        assert_eq!(restored.state, CardState::New);
        assert_eq!(restored.queue, 0);
    }

    #[test]
    fn buried_cards_surface_the_next_day() {
        let deck = Uuid::new_v4();
        let s = settings();
        let buried = bury_card(&review_card(deck, 0, 10), &s, at());
        assert_eq!(buried.state, CardState::Buried);
        assert!(buried_due(std::slice::from_ref(&buried), &s, at()).is_empty());

        let tomorrow = at() + Duration::days(1);
        let due = buried_due(std::slice::from_ref(&buried), &s, tomorrow);
        assert_eq!(due.len(), 1);

        let restored = unbury_cards(std::slice::from_ref(&buried), &s, tomorrow);
        assert_eq!(restored[0].state, CardState::Review);
        assert_eq!(restored[0].due, day_number(at(), 4));
    }

    #[test]
    fn estimated_minutes_round_up() {
        let deck = Uuid::new_v4();
        let cards = vec![new_card(deck), review_card(deck, 0, 10)];
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &settings(), &mut limits, at());
        // 30s + 10s rounds up to one minute.
        assert_eq!(q.estimated_minutes, 1);
    }

    #[test]
    fn other_decks_are_ignored() {
        let deck = Uuid::new_v4();
        let other = Uuid::new_v4();
        let cards = vec![new_card(deck), new_card(other)];
        let mut limits = DailyLimitsStore::new();
        let q = build_study_queue(deck, &cards, &settings(), &mut limits, at());
        assert_eq!(q.counts.new, 1);
    }
}
