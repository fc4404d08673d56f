use serde::{Deserialize, Serialize};

use crate::models::{Card, CardState};

/// Per-state card tally for a deck or collection.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateStatistics {
    pub new: usize,
    pub learning: usize,
    pub review: usize,
    pub relearning: usize,
    pub suspended: usize,
    pub buried: usize,
}

impl StateStatistics {
    pub fn total(&self) -> usize {
        self.new + self.learning + self.review + self.relearning + self.suspended + self.buried
    }
}

pub fn state_statistics(cards: &[Card]) -> StateStatistics {
    let mut stats = StateStatistics::default();
    for card in cards {
        match card.state {
            CardState::New => stats.new += 1,
            CardState::Learning => stats.learning += 1,
            CardState::Review => stats.review += 1,
            CardState::Relearning => stats.relearning += 1,
            CardState::Suspended => stats.suspended += 1,
            CardState::Buried => stats.buried += 1,
        }
    }
    stats
}

/// Percentage of review answers that were not lapses, over the review-state
/// population: `100 * (reps - lapses) / reps`. Returns 0.0 when there is no
/// review history to measure.
pub fn retention_rate(cards: &[Card]) -> f64 {
    let (reps, lapses) = cards
        .iter()
        .filter(|c| c.state == CardState::Review)
        .fold((0i64, 0i64), |(r, l), c| {
            (r + i64::from(c.reps), l + i64::from(c.lapses))
        });
    if reps == 0 {
        return 0.0;
    }
    100.0 * (reps - lapses) as f64 / reps as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AdvancedDeckSettings;
    use uuid::Uuid;

    fn review_card(reps: i32, lapses: i32) -> Card {
        let mut c = Card::new(Uuid::new_v4(), "q", "a", &AdvancedDeckSettings::default());
        c.state = CardState::Review;
        c.queue = CardState::Review.queue_code();
        c.reps = reps;
        c.lapses = lapses;
        c
    }

    #[test]
    fn tallies_cover_every_state() {
        let settings = AdvancedDeckSettings::default();
        let deck = Uuid::new_v4();
        let mut cards = vec![
            Card::new(deck, "q", "a", &settings),
            Card::new(deck, "q", "a", &settings),
        ];
        cards[1].state = CardState::Suspended;
        cards[1].queue = CardState::Suspended.queue_code();
        let stats = state_statistics(&cards);
        assert_eq!(stats.new, 1);
        assert_eq!(stats.suspended, 1);
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn retention_matches_hand_computation() {
        let cards = vec![review_card(10, 1), review_card(2, 0)];
        // 12 reps, 1 lapse: 100 * 11/12.
        assert!((retention_rate(&cards) - 91.666_666).abs() < 0.1);
    }

    #[test]
    fn retention_is_zero_without_history() {
        assert_eq!(retention_rate(&[]), 0.0);
        let new_only = vec![Card::new(
            Uuid::new_v4(),
            "q",
            "a",
            &AdvancedDeckSettings::default(),
        )];
        assert_eq!(retention_rate(&new_only), 0.0);
    }

    #[test]
    fn retention_ignores_non_review_states() {
        let mut learning = review_card(5, 5);
        learning.state = CardState::Learning;
        learning.queue = CardState::Learning.queue_code();
        let cards = vec![review_card(4, 0), learning];
        assert_eq!(retention_rate(&cards), 100.0);
    }
}
