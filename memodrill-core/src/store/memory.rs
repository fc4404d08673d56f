use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::SchedulerError;
use crate::models::{Card, CardId, DeckId};
use crate::settings::AdvancedDeckSettings;
use crate::store::SnapshotStore;

/// In-memory snapshot store: the reference backend for tests and for
/// embedding the engine without a database.
#[derive(Default)]
pub struct MemoryStore {
    cards: RwLock<HashMap<CardId, Card>>,
    settings: RwLock<HashMap<DeckId, AdvancedDeckSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_card(&self, id: CardId) -> Result<Card, SchedulerError> {
        self.cards
            .read()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::NotFound("card"))
    }

    async fn create_card(&self, card: &Card) -> Result<(), SchedulerError> {
        let mut cards = self.cards.write();
        if cards.contains_key(&card.id) {
            return Err(SchedulerError::Conflict("card id already exists"));
        }
        cards.insert(card.id, card.clone());
        Ok(())
    }

    async fn store_card(&self, card: &Card) -> Result<(), SchedulerError> {
        self.cards.write().insert(card.id, card.clone());
        Ok(())
    }

    async fn list_cards(&self, deck_id: DeckId) -> Result<Vec<Card>, SchedulerError> {
        let mut cards: Vec<Card> = self
            .cards
            .read()
            .values()
            .filter(|c| c.deck_id == deck_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.created_at);
        Ok(cards)
    }

    async fn load_settings(&self, deck_id: DeckId) -> Result<AdvancedDeckSettings, SchedulerError> {
        self.settings
            .read()
            .get(&deck_id)
            .cloned()
            .ok_or(SchedulerError::NotFound("deck settings"))
    }

    async fn store_settings(
        &self,
        deck_id: DeckId,
        settings: &AdvancedDeckSettings,
    ) -> Result<(), SchedulerError> {
        self.settings.write().insert(deck_id, settings.clone());
        Ok(())
    }
}
