use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::errors::SchedulerError;
use crate::learning::{apply_leech_action, apply_learning_rating, is_leech};
use crate::models::{
    day_number, Card, CardState, ReviewRating, SchedulingContext, FACTOR_DEFAULT, FACTOR_MAX,
    FACTOR_MIN,
};
use crate::settings::AdvancedDeckSettings;
use crate::state::validate_card;
use crate::stats::retention_rate;

pub const ALGORITHM_LEARNING: &str = "ANKI_LEARNING";
pub const ALGORITHM_REVIEW: &str = "SM2_PLUS";
pub const ALGORITHM_LAPSE: &str = "SM2_PLUS_LAPSE";

/// Per-answer diagnostic trail. `reasoning` is prose for review logs and is
/// never branched on. No interval fuzz is applied, so `fuzzed_interval`
/// always equals `computed_interval`; the field exists for log parity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugInfo {
    pub algorithm: &'static str,
    pub computed_interval: i32,
    pub fuzzed_interval: i32,
    pub final_interval: i32,
    pub ease_delta: i32,
    pub reasoning: String,
}

/// Outcome of answering a card: the updated card plus everything a review
/// log wants to record about the transition.
#[derive(Clone, Debug)]
pub struct SchedulingResult {
    pub card: Card,
    pub was_correct: bool,
    pub previous_state: CardState,
    pub new_state: CardState,
    pub interval_change: i32,
    pub next_review: DateTime<Utc>,
    pub debug: DebugInfo,
}

fn constrain_interval(ivl: i32, settings: &AdvancedDeckSettings) -> i32 {
    ivl.clamp(
        settings.reviews.minimum_interval.max(1),
        settings.reviews.maximum_interval,
    )
}

/// Answers a card. Learning-family states go through the step engine;
/// review cards get the SM-2+ arms. Suspended and buried cards cannot be
/// answered, and structurally broken cards are rejected up front.
pub fn schedule_card(
    card: &Card,
    rating: ReviewRating,
    settings: &AdvancedDeckSettings,
    ctx: &SchedulingContext,
) -> Result<SchedulingResult, SchedulerError> {
    let check = validate_card(card, settings);
    if !check.is_valid {
        return Err(SchedulerError::InvalidCard(check.errors.join("; ")));
    }
    match card.state {
        CardState::Suspended | CardState::Buried => {
            Err(SchedulerError::UnschedulableState(card.state))
        }
        CardState::New | CardState::Learning | CardState::Relearning => {
            apply_learning_rating(card, rating, settings, ctx)
        }
        CardState::Review => Ok(apply_review_rating(card, rating, settings, ctx)),
    }
}

fn apply_review_rating(
    card: &Card,
    rating: ReviewRating,
    settings: &AdvancedDeckSettings,
    ctx: &SchedulingContext,
) -> SchedulingResult {
    let previous_ivl = card.ivl;
    let previous_factor = card.factor;
    let mut card = card.clone();
    card.record_answer(ctx, settings);

    let today = day_number(ctx.now, settings.advanced.day_starts_at);
    let ease = f64::from(card.factor) / 1000.0;
    let modifier = settings.reviews.interval_modifier;

    let algorithm;
    let computed;
    let reasoning;
    let was_correct;

    match rating {
        ReviewRating::Again => {
            algorithm = ALGORITHM_LAPSE;
            was_correct = false;
            card.lapses += 1;
            card.factor = (card.factor - 200).max(FACTOR_MIN);
            computed =
                (f64::from(previous_ivl) * settings.lapses.new_interval).round() as i32;
            card.ivl = computed.max(settings.lapses.minimum_interval);
            card.state = CardState::Relearning;
            card.learning_step = 0;
            card.left = settings
                .lapses
                .steps_minutes
                .first()
                .copied()
                .unwrap_or(10)
                .max(1);
            card.due = today;
            reasoning = format!(
                "lapse {}: interval {previous_ivl} -> {} days, relearning in {} min",
                card.lapses, card.ivl, card.left
            );
            if is_leech(&card, settings) {
                card = apply_leech_action(&card, settings);
            }
        }
        ReviewRating::Hard => {
            algorithm = ALGORITHM_REVIEW;
            was_correct = true;
            card.factor = (card.factor - 150).max(FACTOR_MIN);
            computed =
                (f64::from(previous_ivl) * settings.reviews.hard_interval).round() as i32;
            card.ivl = constrain_interval(computed, settings);
            card.due = today + i64::from(card.ivl);
            reasoning = format!(
                "hard: interval {previous_ivl} -> {} days, ease {}",
                card.ivl, card.factor
            );
        }
        ReviewRating::Good => {
            algorithm = ALGORITHM_REVIEW;
            was_correct = true;
            computed = (f64::from(previous_ivl) * ease * modifier).round() as i32;
            card.ivl = constrain_interval(computed, settings);
            card.due = today + i64::from(card.ivl);
            reasoning = format!(
                "good: interval {previous_ivl} -> {} days at ease {}",
                card.ivl, card.factor
            );
        }
        ReviewRating::Easy => {
            algorithm = ALGORITHM_REVIEW;
            was_correct = true;
            computed = (f64::from(previous_ivl) * ease * modifier * settings.reviews.easy_bonus)
                .round() as i32;
            card.factor = (card.factor + 150).min(FACTOR_MAX);
            card.ivl = constrain_interval(computed, settings);
            card.due = today + i64::from(card.ivl);
            reasoning = format!(
                "easy: interval {previous_ivl} -> {} days, ease {}",
                card.ivl, card.factor
            );
        }
    }
    card.queue = card.state.queue_code();

    let next_review = match card.state {
        CardState::Learning | CardState::Relearning => {
            ctx.now + Duration::minutes(i64::from(card.left))
        }
        _ => ctx.now + Duration::days(i64::from(card.ivl)),
    };
    debug!("card {} review {rating:?}: {reasoning}", card.id);

    SchedulingResult {
        was_correct,
        previous_state: CardState::Review,
        new_state: card.state,
        interval_change: card.ivl - previous_ivl,
        next_review,
        debug: DebugInfo {
            algorithm,
            computed_interval: computed,
            fuzzed_interval: computed,
            final_interval: card.ivl,
            ease_delta: card.factor - previous_factor,
            reasoning,
        },
        card,
    }
}

/// What one rating would do to a card, without applying it.
#[derive(Clone, Debug)]
pub struct RatingPreview {
    pub rating: ReviewRating,
    /// Review interval in days after the answer; 0 while still in steps.
    pub interval: i32,
    pub next_review: DateTime<Utc>,
    pub new_state: CardState,
}

#[derive(Clone, Debug)]
pub struct SchedulingPreview {
    pub again: RatingPreview,
    pub hard: RatingPreview,
    pub good: RatingPreview,
    pub easy: RatingPreview,
}

/// Simulates all four answers against clones of the card. The input is
/// never mutated; each branch starts from the same snapshot.
pub fn preview_ratings(
    card: &Card,
    settings: &AdvancedDeckSettings,
    now: DateTime<Utc>,
) -> Result<SchedulingPreview, SchedulerError> {
    let ctx = SchedulingContext::at(now, 0);
    let preview = |rating| -> Result<RatingPreview, SchedulerError> {
        let result = schedule_card(card, rating, settings, &ctx)?;
        Ok(RatingPreview {
            rating,
            interval: result.debug.final_interval,
            next_review: result.next_review,
            new_state: result.new_state,
        })
    };
    Ok(SchedulingPreview {
        again: preview(ReviewRating::Again)?,
        hard: preview(ReviewRating::Hard)?,
        good: preview(ReviewRating::Good)?,
        easy: preview(ReviewRating::Easy)?,
    })
}

/// Tunes a settings value against observed retention: the interval modifier
/// moves 0.5% per percentage point of gap to the target (clamped to
/// [0.5, 2.0]), and a depressed mean ease raises the starting ease by a
/// quarter of the shortfall, capped at 3000. Returns a new value; cards and
/// the input settings are untouched.
pub fn optimize_settings(
    cards: &[Card],
    settings: &AdvancedDeckSettings,
    target_percent: f64,
) -> AdvancedDeckSettings {
    let mut tuned = settings.clone();

    let review: Vec<&Card> = cards
        .iter()
        .filter(|c| c.state == CardState::Review)
        .collect();
    let total_reps: i64 = review.iter().map(|c| i64::from(c.reps)).sum();
    if total_reps == 0 {
        return tuned;
    }

    let actual = retention_rate(cards);
    let gap = actual - target_percent;
    tuned.reviews.interval_modifier =
        (settings.reviews.interval_modifier * (1.0 + gap * 0.005)).clamp(0.5, 2.0);

    let mean_factor = review.iter().map(|c| f64::from(c.factor)).sum::<f64>() / review.len() as f64;
    if mean_factor < f64::from(FACTOR_DEFAULT) {
        let raise = ((f64::from(FACTOR_DEFAULT) - mean_factor) / 4.0).round() as i32;
        tuned.new_cards.starting_ease =
            (settings.new_cards.starting_ease + raise).min(3000);
    }

    info!(
        "optimized settings: retention {actual:.1}% vs target {target_percent:.1}%, \
         modifier {:.3} -> {:.3}, starting ease {} -> {}",
        settings.reviews.interval_modifier,
        tuned.reviews.interval_modifier,
        settings.new_cards.starting_ease,
        tuned.new_cards.starting_ease,
    );
    tuned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn settings() -> AdvancedDeckSettings {
        AdvancedDeckSettings::default()
    }

    fn ctx() -> SchedulingContext {
        SchedulingContext::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(), 5_000)
    }

    fn review_card(ivl: i32, factor: i32) -> Card {
        let mut c = Card::new(Uuid::new_v4(), "q", "a", &settings());
        c.state = CardState::Review;
        c.queue = 2;
        c.reps = 4;
        c.ivl = ivl;
        c.factor = factor;
        c.due = day_number(ctx().now, 4);
        c
    }

    #[test]
    fn hard_multiplies_and_penalizes_ease() {
        let r = schedule_card(&review_card(7, 2500), ReviewRating::Hard, &settings(), &ctx())
            .unwrap();
        assert_eq!(r.card.ivl, 8);
        assert_eq!(r.card.factor, 2350);
        assert_eq!(r.debug.ease_delta, -150);
        assert!(r.was_correct);
        assert_eq!(r.card.state, CardState::Review);
    }

    #[test]
    fn good_applies_the_ease_factor() {
        let r = schedule_card(&review_card(10, 2500), ReviewRating::Good, &settings(), &ctx())
            .unwrap();
        assert_eq!(r.card.ivl, 25);
        assert_eq!(r.card.factor, 2500);
        assert_eq!(r.interval_change, 15);
    }

    #[test]
    fn easy_adds_the_bonus_and_raises_ease() {
        let r = schedule_card(&review_card(10, 2500), ReviewRating::Easy, &settings(), &ctx())
            .unwrap();
        assert_eq!(r.card.ivl, 33);
        assert_eq!(r.card.factor, 2650);
    }

    #[test]
    fn again_lapses_into_relearning() {
        let r = schedule_card(&review_card(10, 2500), ReviewRating::Again, &settings(), &ctx())
            .unwrap();
        assert_eq!(r.card.state, CardState::Relearning);
        assert_eq!(r.card.queue, 1);
        assert_eq!(r.card.ivl, 5);
        assert_eq!(r.card.factor, 2300);
        assert_eq!(r.card.lapses, 1);
        assert_eq!(r.card.left, 10);
        assert_eq!(r.debug.algorithm, ALGORITHM_LAPSE);
        assert!(!r.was_correct);
    }

    #[test]
    fn lapse_interval_respects_the_floor() {
        let mut s = settings();
        s.lapses.minimum_interval = 2;
        let r = schedule_card(&review_card(1, 2500), ReviewRating::Again, &s, &ctx()).unwrap();
        assert_eq!(r.card.ivl, 2);
    }

    #[test]
    fn ease_stays_within_bounds() {
        let low = schedule_card(&review_card(5, 1300), ReviewRating::Again, &settings(), &ctx())
            .unwrap();
        assert_eq!(low.card.factor, FACTOR_MIN);

        let high = schedule_card(&review_card(5, 5000), ReviewRating::Easy, &settings(), &ctx())
            .unwrap();
        assert_eq!(high.card.factor, FACTOR_MAX);
    }

    #[test]
    fn interval_is_capped_at_the_maximum() {
        let mut s = settings();
        s.reviews.maximum_interval = 100;
        let r = schedule_card(&review_card(90, 2500), ReviewRating::Good, &s, &ctx()).unwrap();
        assert_eq!(r.card.ivl, 100);
        assert_eq!(r.debug.computed_interval, 225);
        assert_eq!(r.debug.final_interval, 100);
    }

    #[test]
    fn lapse_at_threshold_suspends_the_leech() {
        let mut c = review_card(10, 2500);
        c.lapses = 7;
        let r = schedule_card(&c, ReviewRating::Again, &settings(), &ctx()).unwrap();
        assert_eq!(r.card.lapses, 8);
        assert_eq!(r.card.state, CardState::Suspended);
        assert!(r.card.is_leech_flagged());
    }

    #[test]
    fn reps_count_lapses_too() {
        let r = schedule_card(&review_card(10, 2500), ReviewRating::Again, &settings(), &ctx())
            .unwrap();
        assert_eq!(r.card.reps, 5);
    }

    #[test]
    fn suspended_and_buried_cards_are_unschedulable() {
        for state in [CardState::Suspended, CardState::Buried] {
            let mut c = review_card(10, 2500);
            c.state = state;
            c.queue = state.queue_code();
            let err = schedule_card(&c, ReviewRating::Good, &settings(), &ctx()).unwrap_err();
            assert!(matches!(err, SchedulerError::UnschedulableState(s) if s == state));
        }
    }

    #[test]
    fn invalid_cards_are_rejected_with_reasons() {
        let mut c = review_card(10, 2500);
        c.front = String::new();
        let err = schedule_card(&c, ReviewRating::Good, &settings(), &ctx()).unwrap_err();
        match err {
            SchedulerError::InvalidCard(msg) => assert!(msg.contains("front")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn answer_time_is_clamped_into_aggregates() {
        let ctx = SchedulingContext::at(ctx().now, 600_000);
        let r = schedule_card(&review_card(10, 2500), ReviewRating::Good, &settings(), &ctx)
            .unwrap();
        // 60s cutoff.
        assert_eq!(r.card.total_study_time, 60_000);
        assert_eq!(r.card.average_answer_time, 12_000);
    }

    #[test]
    fn preview_is_monotonic_and_pure() {
        let card = review_card(10, 2500);
        let before = card.clone();
        let p = preview_ratings(&card, &settings(), ctx().now).unwrap();
        assert_eq!(card, before);
        assert!(p.again.interval <= p.hard.interval);
        assert!(p.hard.interval <= p.good.interval);
        assert!(p.good.interval <= p.easy.interval);
        assert!(p.again.interval < card.ivl);
        assert_eq!(p.again.new_state, CardState::Relearning);
    }

    #[test]
    fn preview_covers_learning_cards() {
        let card = Card::new(Uuid::new_v4(), "q", "a", &settings());
        let p = preview_ratings(&card, &settings(), ctx().now).unwrap();
        assert_eq!(p.again.new_state, CardState::Learning);
        assert_eq!(p.easy.new_state, CardState::Review);
        assert_eq!(p.easy.interval, 4);
    }

    #[test]
    fn optimizer_shortens_intervals_when_retention_is_low() {
        let mut lapsed = review_card(10, 2200);
        lapsed.reps = 10;
        lapsed.lapses = 5;
        let cards = vec![lapsed];
        // 50% retention against a 90% target.
        let tuned = optimize_settings(&cards, &settings(), 90.0);
        assert!(tuned.reviews.interval_modifier < 1.0);
        assert!(tuned.new_cards.starting_ease > 2500);
        assert!(tuned.new_cards.starting_ease <= 3000);
    }

    #[test]
    fn optimizer_lengthens_intervals_when_retention_is_high() {
        let mut solid = review_card(10, 2500);
        solid.reps = 20;
        solid.lapses = 0;
        let tuned = optimize_settings(&[solid], &settings(), 90.0);
        assert!(tuned.reviews.interval_modifier > 1.0);
        assert!(tuned.reviews.interval_modifier <= 2.0);
        assert_eq!(tuned.new_cards.starting_ease, 2500);
    }

    #[test]
    fn optimizer_without_history_is_a_no_op() {
        let s = settings();
        let tuned = optimize_settings(&[], &s, 90.0);
        assert_eq!(tuned, s);

        let new_only = vec![Card::new(Uuid::new_v4(), "q", "a", &s)];
        assert_eq!(optimize_settings(&new_only, &s, 90.0), s);
    }
}
