//! Builder state types

use crate::chat::UserRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One of the question fields the user can edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Body,
    Codeblock,
    Output,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Title, Field::Body, Field::Codeblock, Field::Output];

    /// Menu keyword selecting this field
    pub fn keyword(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Body => "body",
            Field::Codeblock => "codeblock",
            Field::Output => "output",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Title => "Title",
            Field::Body => "Body",
            Field::Codeblock => "Codeblock",
            Field::Output => "Output",
        }
    }

    pub fn is_mandatory(self) -> bool {
        matches!(self, Field::Title | Field::Body)
    }

    pub fn from_keyword(text: &str) -> Option<Field> {
        Field::ALL
            .into_iter()
            .find(|field| text.eq_ignore_ascii_case(field.keyword()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Field values collected so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub title: Option<String>,
    pub body: Option<String>,
    pub codeblock: Option<String>,
    pub output: Option<String>,
}

impl QuestionDraft {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => self.title.as_deref(),
            Field::Body => self.body.as_deref(),
            Field::Codeblock => self.codeblock.as_deref(),
            Field::Output => self.output.as_deref(),
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Body => &mut self.body,
            Field::Codeblock => &mut self.codeblock,
            Field::Output => &mut self.output,
        };
        *slot = Some(value);
    }

    pub fn is_set(&self, field: Field) -> bool {
        self.get(field).is_some()
    }
}

/// Builder state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowState {
    /// Field summary shown, waiting for a keyword
    #[default]
    Menu,

    /// Waiting for the new value of one field
    Editing { field: Field },

    /// Validation passed, posting the question
    Completing {
        /// Id of the `done` message, reused if posting fails and we wait again
        trigger: crate::chat::MessageId,
    },

    /// User quit (terminal)
    Cancelled,

    /// No reply within the window (terminal)
    TimedOut,

    /// Question posted (terminal)
    Posted,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Cancelled | FlowState::TimedOut | FlowState::Posted
        )
    }

    /// States in which a reply wait is outstanding
    pub fn awaits_reply(&self) -> bool {
        matches!(self, FlowState::Menu | FlowState::Editing { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Menu => "menu",
            FlowState::Editing { .. } => "editing",
            FlowState::Completing { .. } => "completing",
            FlowState::Cancelled => "cancelled",
            FlowState::TimedOut => "timed_out",
            FlowState::Posted => "posted",
        }
    }
}

/// Per-conversation configuration the transition function reads
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub user: UserRef,
    /// Language tag of the fence wrapped around code blocks
    pub code_language: String,
    pub reply_timeout: Duration,
}

impl FlowContext {
    pub fn new(user: UserRef, code_language: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            user,
            code_language: code_language.into(),
            reply_timeout,
        }
    }
}
