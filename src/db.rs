//! Database module for the question builder
//!
//! Provides persistence for posted questions.

mod schema;

pub use schema::*;

use crate::chat::{SurfaceId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Question not found: {0}")]
    QuestionNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Question Operations ====================

    pub fn insert_question(&self, question: &QuestionRecord) -> DbResult<()> {
        self.conn().execute(
            "INSERT INTO questions (id, author_id, title, body, codeblock, output, thread_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                question.id,
                question.author_id.as_str(),
                question.title,
                question.body,
                question.codeblock,
                question.output,
                question.thread_id.as_str(),
                question.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[allow(dead_code)] // Used in tests
    pub fn get_question(&self, id: &str) -> DbResult<QuestionRecord> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, author_id, title, body, codeblock, output, thread_id, created_at
             FROM questions WHERE id = ?1",
        )?;
        stmt.query_row(params![id], parse_question_row)
            .optional()?
            .ok_or_else(|| DbError::QuestionNotFound(id.to_string()))
    }

    /// Questions posted by `author`, newest first
    pub fn list_questions_by_author(&self, author: &UserId) -> DbResult<Vec<QuestionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, author_id, title, body, codeblock, output, thread_id, created_at
             FROM questions WHERE author_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![author.as_str()], parse_question_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn parse_question_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestionRecord> {
    Ok(QuestionRecord {
        id: row.get(0)?,
        author_id: UserId::new(row.get::<_, String>(1)?),
        title: row.get(2)?,
        body: row.get(3)?,
        codeblock: row.get(4)?,
        output: row.get(5)?,
        thread_id: SurfaceId::new(row.get::<_, String>(6)?),
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
