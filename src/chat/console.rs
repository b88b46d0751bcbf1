//! Line-oriented stand-in for a chat gateway
//!
//! Input lines look like `<user> /ask` or `<user> <text>`. Everything the
//! flow sends is printed to stdout, prefixed with the surface name.

use super::{ChatClient, ChatError, Colour, Embed, MessageId, OutgoingMessage, SurfaceId, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Ask { user: String },
    /// List the user's posted questions
    History { user: String },
    Say { user: String, text: String },
}

pub fn parse_line(line: &str) -> Option<ConsoleInput> {
    let (user, rest) = line.trim().split_once(char::is_whitespace)?;
    let text = rest.trim();
    let user = user.to_string();
    match text {
        "" => None,
        "/ask" => Some(ConsoleInput::Ask { user }),
        "/questions" => Some(ConsoleInput::History { user }),
        _ => Some(ConsoleInput::Say {
            user,
            text: text.to_string(),
        }),
    }
}

fn is_blank(name: &str) -> bool {
    name.chars().all(|c| c == '\u{200b}' || c.is_whitespace())
}

fn render_embed(embed: &Embed) -> String {
    let marker = if embed.colour == Colour::ATTENTION { "(!) " } else { "" };
    let mut lines = vec![format!("{marker}{}", embed.title)];
    let mut row: Vec<String> = Vec::new();

    for field in &embed.fields {
        let entry = if is_blank(&field.name) {
            field.value.clone()
        } else {
            format!("{}: {}", field.name, field.value)
        };
        if field.inline {
            row.push(entry);
        } else {
            if !row.is_empty() {
                lines.push(row.join(" | "));
                row.clear();
            }
            lines.push(entry);
        }
    }
    if !row.is_empty() {
        lines.push(row.join(" | "));
    }
    if let Some(footer) = &embed.footer {
        lines.push(footer.clone());
    }
    lines.join("\n")
}

/// Render a message as printed lines, continuation lines indented
pub fn render(surface_name: &str, message: &OutgoingMessage) -> String {
    let text = match message {
        OutgoingMessage::Text { content } => content.clone(),
        OutgoingMessage::Embed { embed } => render_embed(embed),
    };
    let mut lines = text.lines();
    let mut out = format!("[#{surface_name}] {}", lines.next().unwrap_or_default());
    for line in lines {
        out.push_str("\n    ");
        out.push_str(line);
    }
    out
}

struct SurfaceEntry {
    name: String,
    messages: HashSet<MessageId>,
}

impl SurfaceEntry {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: HashSet::new(),
        }
    }
}

/// Chat client printing to stdout. Surfaces and the messages sent to them
/// are tracked so that stale references fail like they would on a real
/// platform.
pub struct ConsoleChat {
    surfaces: Mutex<HashMap<SurfaceId, SurfaceEntry>>,
}

impl ConsoleChat {
    /// `channels` are the pre-existing channels messages may be sent to
    pub fn new(channels: impl IntoIterator<Item = SurfaceId>) -> Self {
        let surfaces = channels
            .into_iter()
            .map(|id| {
                let entry = SurfaceEntry::new(id.as_str());
                (id, entry)
            })
            .collect();
        Self {
            surfaces: Mutex::new(surfaces),
        }
    }

    fn surfaces(&self) -> MutexGuard<'_, HashMap<SurfaceId, SurfaceEntry>> {
        self.surfaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_message_id(&self) -> MessageId {
        MessageId::new(uuid::Uuid::new_v4().simple().to_string())
    }

    fn surface_name(&self, surface: &SurfaceId) -> Result<String, ChatError> {
        self.surfaces()
            .get(surface)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| ChatError::SurfaceNotFound(surface.clone()))
    }

    /// Name of the surface, provided `message` was sent there
    fn message_surface_name(
        &self,
        surface: &SurfaceId,
        message: &MessageId,
        remove: bool,
    ) -> Result<String, ChatError> {
        let mut surfaces = self.surfaces();
        let entry = surfaces
            .get_mut(surface)
            .ok_or_else(|| ChatError::SurfaceNotFound(surface.clone()))?;
        let known = if remove {
            entry.messages.remove(message)
        } else {
            entry.messages.contains(message)
        };
        if known {
            Ok(entry.name.clone())
        } else {
            Err(ChatError::MessageNotFound(message.clone()))
        }
    }

    fn add_surface(&self, name: &str) -> SurfaceId {
        let id = SurfaceId::new(uuid::Uuid::new_v4().simple().to_string());
        self.surfaces().insert(id.clone(), SurfaceEntry::new(name));
        id
    }

    fn print(line: &str) -> Result<(), ChatError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|e| ChatError::Platform(e.to_string()))
    }
}

#[async_trait]
impl ChatClient for ConsoleChat {
    async fn send_message(
        &self,
        surface: &SurfaceId,
        content: &OutgoingMessage,
    ) -> Result<MessageId, ChatError> {
        let name = self.surface_name(surface)?;
        Self::print(&render(&name, content))?;

        let id = self.next_message_id();
        if let Some(entry) = self.surfaces().get_mut(surface) {
            entry.messages.insert(id.clone());
        }
        Ok(id)
    }

    async fn delete_message(
        &self,
        surface: &SurfaceId,
        message: &MessageId,
    ) -> Result<(), ChatError> {
        let name = self.message_surface_name(surface, message, true)?;
        tracing::debug!(surface = %name, message = %message, "Deleted message");
        Ok(())
    }

    async fn pin_message(&self, surface: &SurfaceId, message: &MessageId) -> Result<(), ChatError> {
        let name = self.message_surface_name(surface, message, false)?;
        Self::print(&format!("[#{name}] (pinned {message})"))
    }

    async fn create_scratch_surface(
        &self,
        parent: &SurfaceId,
        label: &str,
        member: &UserId,
    ) -> Result<SurfaceId, ChatError> {
        let parent_name = self.surface_name(parent)?;
        let id = self.add_surface(label);
        Self::print(&format!(
            "[#{parent_name}] private thread \"{label}\" opened for {member}"
        ))?;
        Ok(id)
    }

    async fn create_permanent_surface(
        &self,
        parent: &SurfaceId,
        title: &str,
    ) -> Result<SurfaceId, ChatError> {
        let parent_name = self.surface_name(parent)?;
        let id = self.add_surface(title);
        Self::print(&format!("[#{parent_name}] thread \"{title}\" created"))?;
        Ok(id)
    }

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), ChatError> {
        let entry = self
            .surfaces()
            .remove(surface)
            .ok_or_else(|| ChatError::SurfaceNotFound(surface.clone()))?;
        Self::print(&format!("[#{}] (deleted)", entry.name))
    }
}
