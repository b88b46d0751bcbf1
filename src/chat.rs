//! Chat platform collaborator interface
//!
//! Identifiers, inbound/outbound message shapes and the `ChatClient` trait
//! the conversation runtime talks to. Gateway management lives outside the
//! core; `console` provides a line-oriented stand-in for local runs.

pub mod console;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identifier of a human participant
    UserId
);
string_id!(
    /// A conversation surface: channel or thread
    SurfaceId
);
string_id!(MessageId);

/// A participant together with the name used when addressing them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
        }
    }

    /// Platform mention markup for this user
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// One message delivered from the inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub author: UserId,
    pub surface: SurfaceId,
    pub id: MessageId,
    pub text: String,
}

/// RGB colour of an embed side bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colour(pub u8, pub u8, pub u8);

impl Colour {
    pub const PROMPT: Colour = Colour(32, 209, 181);
    pub const ATTENTION: Colour = Colour(237, 66, 69);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Rich message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub fields: Vec<EmbedField>,
    pub colour: Colour,
    pub footer: Option<String>,
}

impl Embed {
    pub fn new(title: impl Into<String>, colour: Colour) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
            colour,
            footer: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}

/// Content sent to a surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Text { content: String },
    Embed { embed: Embed },
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        OutgoingMessage::Text {
            content: content.into(),
        }
    }

    pub fn embed(embed: Embed) -> Self {
        OutgoingMessage::Embed { embed }
    }

    /// Flattened text, used for logging and by test assertions
    pub fn plain_text(&self) -> String {
        match self {
            OutgoingMessage::Text { content } => content.clone(),
            OutgoingMessage::Embed { embed } => {
                let mut out = embed.title.clone();
                for field in &embed.fields {
                    out.push('\n');
                    out.push_str(&field.name);
                    out.push_str(": ");
                    out.push_str(&field.value);
                }
                if let Some(footer) = &embed.footer {
                    out.push('\n');
                    out.push_str(footer);
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("Surface not found: {0}")]
    SurfaceNotFound(SurfaceId),
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("Chat platform error: {0}")]
    Platform(String),
}

/// Outbound primitives of the chat platform
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(
        &self,
        surface: &SurfaceId,
        content: &OutgoingMessage,
    ) -> Result<MessageId, ChatError>;

    async fn delete_message(&self, surface: &SurfaceId, message: &MessageId)
        -> Result<(), ChatError>;

    async fn pin_message(&self, surface: &SurfaceId, message: &MessageId) -> Result<(), ChatError>;

    /// Create the private per-user work area and add `member` to it
    async fn create_scratch_surface(
        &self,
        parent: &SurfaceId,
        label: &str,
        member: &UserId,
    ) -> Result<SurfaceId, ChatError>;

    /// Create the public destination for a finished question
    async fn create_permanent_surface(
        &self,
        parent: &SurfaceId,
        title: &str,
    ) -> Result<SurfaceId, ChatError>;

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), ChatError>;
}

#[async_trait]
impl<T: ChatClient + ?Sized> ChatClient for Arc<T> {
    async fn send_message(
        &self,
        surface: &SurfaceId,
        content: &OutgoingMessage,
    ) -> Result<MessageId, ChatError> {
        (**self).send_message(surface, content).await
    }

    async fn delete_message(
        &self,
        surface: &SurfaceId,
        message: &MessageId,
    ) -> Result<(), ChatError> {
        (**self).delete_message(surface, message).await
    }

    async fn pin_message(&self, surface: &SurfaceId, message: &MessageId) -> Result<(), ChatError> {
        (**self).pin_message(surface, message).await
    }

    async fn create_scratch_surface(
        &self,
        parent: &SurfaceId,
        label: &str,
        member: &UserId,
    ) -> Result<SurfaceId, ChatError> {
        (**self).create_scratch_surface(parent, label, member).await
    }

    async fn create_permanent_surface(
        &self,
        parent: &SurfaceId,
        title: &str,
    ) -> Result<SurfaceId, ChatError> {
        (**self).create_permanent_surface(parent, title).await
    }

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), ChatError> {
        (**self).delete_surface(surface).await
    }
}
