//! Trait abstractions for runtime I/O
//!
//! Chat I/O lives in `crate::chat`; this module holds the persistence seam.

use crate::db::{Database, DbError, QuestionRecord};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of posted questions
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Called exactly once per posted question
    async fn persist(&self, question: &QuestionRecord) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: QuestionStore + ?Sized> QuestionStore for Arc<T> {
    async fn persist(&self, question: &QuestionRecord) -> Result<(), StoreError> {
        (**self).persist(question).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a QuestionStore
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Useful for tests
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl QuestionStore for DatabaseStore {
    async fn persist(&self, question: &QuestionRecord) -> Result<(), StoreError> {
        self.db.insert_question(question)?;
        Ok(())
    }
}
