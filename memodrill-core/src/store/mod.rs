//! Snapshot persistence seam.
//!
//! Scheduling operations never touch storage themselves: callers load a
//! card snapshot, run a pure operation, and persist the returned value.
//! This trait is the key-value surface external backends implement;
//! [`MemoryStore`] is the bundled reference implementation.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::errors::SchedulerError;
use crate::models::{Card, CardId, DeckId};
use crate::settings::AdvancedDeckSettings;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_card(&self, id: CardId) -> Result<Card, SchedulerError>;

    /// Inserts a brand-new card; fails with a conflict if the id is taken.
    async fn create_card(&self, card: &Card) -> Result<(), SchedulerError>;

    /// Upserts a card snapshot.
    async fn store_card(&self, card: &Card) -> Result<(), SchedulerError>;

    async fn list_cards(&self, deck_id: DeckId) -> Result<Vec<Card>, SchedulerError>;

    async fn load_settings(&self, deck_id: DeckId) -> Result<AdvancedDeckSettings, SchedulerError>;

    async fn store_settings(
        &self,
        deck_id: DeckId,
        settings: &AdvancedDeckSettings,
    ) -> Result<(), SchedulerError>;
}
