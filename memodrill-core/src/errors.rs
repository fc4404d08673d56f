use thiserror::Error;

use crate::models::CardState;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot schedule invalid card: {0}")]
    InvalidCard(String),
    #[error("cannot schedule card in state: {0}")]
    UnschedulableState(CardState),
    #[error("invalid card state for learning steps: {0}")]
    NotInLearning(CardState),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
}
