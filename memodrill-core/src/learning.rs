use chrono::Duration;
use log::{debug, warn};

use crate::errors::SchedulerError;
use crate::models::{
    day_number, Card, CardState, ReviewRating, SchedulingContext, FACTOR_MAX, FLAG_LEECH,
};
use crate::scheduler::{DebugInfo, SchedulingResult, ALGORITHM_LEARNING};
use crate::settings::{AdvancedDeckSettings, LeechAction};

/// Minutes for a given step index. Empty step lists fall back to the single
/// default step; an index past the end sticks to the last step.
fn step_minutes(steps: &[i32], index: usize, fallback: i32) -> i32 {
    match steps.last() {
        Some(_) => steps[index.min(steps.len() - 1)].max(1),
        None => fallback.max(1),
    }
}

fn graduate(
    card: &mut Card,
    from: CardState,
    settings: &AdvancedDeckSettings,
    today: i64,
    easy: bool,
) -> i32 {
    card.state = CardState::Review;
    card.left = 0;
    card.learning_step = 0;

    let mut ease_delta = 0;
    card.ivl = if easy {
        let target = (settings.new_cards.starting_ease + 150).min(FACTOR_MAX);
        ease_delta = target - card.factor;
        card.factor = target;
        if card.easy_interval > 0 {
            card.easy_interval
        } else {
            settings.new_cards.easy_interval
        }
    } else if from == CardState::Relearning {
        // The post-lapse interval was computed when the lapse happened.
        card.ivl.max(settings.lapses.minimum_interval)
    } else if card.graduation_interval > 0 {
        card.graduation_interval
    } else {
        settings.new_cards.graduating_interval
    };
    card.ivl = card.ivl.max(1);
    card.due = today + i64::from(card.ivl);
    ease_delta
}

/// Drives a new/learning/relearning card one answer forward through its step
/// sequence. Review-state cards belong to the SM-2+ arm and are rejected.
pub fn apply_learning_rating(
    card: &Card,
    rating: ReviewRating,
    settings: &AdvancedDeckSettings,
    ctx: &SchedulingContext,
) -> Result<SchedulingResult, SchedulerError> {
    if !card.state.in_learning() {
        return Err(SchedulerError::NotInLearning(card.state));
    }

    let previous_state = card.state;
    let previous_ivl = card.ivl;
    let mut card = card.clone();
    card.record_answer(ctx, settings);

    let steps = settings.steps_for(previous_state);
    let fallback = if previous_state == CardState::Relearning {
        10
    } else {
        1
    };
    let today = day_number(ctx.now, settings.advanced.day_starts_at);
    let step = card.learning_step.max(0) as usize;
    let step_count = steps.len().max(1);
    let mut ease_delta = 0;
    let reasoning;

    match rating {
        ReviewRating::Again => {
            card.lapses += 1;
            card.learning_step = 0;
            card.left = step_minutes(steps, 0, fallback);
            if card.state == CardState::New {
                card.state = CardState::Learning;
            }
            reasoning = format!(
                "again: back to step 1 of {step_count}, next in {} min",
                card.left
            );
        }
        ReviewRating::Hard => {
            // One step back, not a lapse. State is left alone.
            card.learning_step = step.saturating_sub(1) as i32;
            card.left = step_minutes(steps, step.saturating_sub(1), fallback);
            reasoning = format!(
                "hard: back to step {} of {step_count}, next in {} min",
                step.saturating_sub(1) + 1,
                card.left
            );
        }
        ReviewRating::Good => {
            if step + 1 >= step_count {
                graduate(&mut card, previous_state, settings, today, false);
                reasoning = format!("good: graduated at {} days", card.ivl);
            } else {
                card.learning_step = (step + 1) as i32;
                card.left = step_minutes(steps, step + 1, fallback);
                if card.state == CardState::New {
                    card.state = CardState::Learning;
                }
                reasoning = format!(
                    "good: advanced to step {} of {step_count}, next in {} min",
                    step + 2,
                    card.left
                );
            }
        }
        ReviewRating::Easy => {
            ease_delta = graduate(&mut card, previous_state, settings, today, true);
            reasoning = format!("easy: graduated immediately at {} days", card.ivl);
        }
    }
    card.queue = card.state.queue_code();

    let graduated = card.state == CardState::Review;
    let next_review = if graduated {
        ctx.now + Duration::days(i64::from(card.ivl))
    } else {
        ctx.now + Duration::minutes(i64::from(card.left))
    };
    let interval = if graduated { card.ivl } else { 0 };
    debug!("card {} learning {rating:?}: {reasoning}", card.id);

    Ok(SchedulingResult {
        was_correct: rating >= ReviewRating::Good,
        previous_state,
        new_state: card.state,
        interval_change: card.ivl - previous_ivl,
        next_review,
        debug: DebugInfo {
            algorithm: ALGORITHM_LEARNING,
            computed_interval: interval,
            fuzzed_interval: interval,
            final_interval: interval,
            ease_delta,
            reasoning,
        },
        card,
    })
}

/// A card lapsed often enough to count as a leech. A threshold of zero
/// disables detection.
pub fn is_leech(card: &Card, settings: &AdvancedDeckSettings) -> bool {
    settings.lapses.leech_threshold > 0 && card.lapses >= settings.lapses.leech_threshold
}

/// Applies the configured leech response: flag the card, and either suspend
/// it or tag it for manual triage.
pub fn apply_leech_action(card: &Card, settings: &AdvancedDeckSettings) -> Card {
    let mut card = card.clone();
    card.flags |= FLAG_LEECH;
    match settings.lapses.leech_action {
        LeechAction::Suspend => {
            card.original_due = card.due;
            card.due = 0;
            card.state = CardState::Suspended;
            card.queue = card.state.queue_code();
            warn!("card {} is a leech after {} lapses, suspended", card.id, card.lapses);
        }
        LeechAction::Tag => {
            if !card.tags.iter().any(|t| t == "leech") {
                card.tags.push("leech".into());
            }
            warn!("card {} is a leech after {} lapses, tagged", card.id, card.lapses);
        }
    }
    card
}
