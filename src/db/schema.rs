//! Database schema and types

use crate::chat::{SurfaceId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    author_id TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    codeblock TEXT,
    output TEXT,
    thread_id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_questions_author ON questions(author_id, created_at DESC);
";

/// A posted question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub author_id: UserId,
    pub title: String,
    pub body: String,
    pub codeblock: Option<String>,
    pub output: Option<String>,
    /// Permanent surface the question was posted to
    pub thread_id: SurfaceId,
    pub created_at: DateTime<Utc>,
}
