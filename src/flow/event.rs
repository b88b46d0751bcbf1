//! Events that drive the builder

use crate::chat::{MessageId, SurfaceId};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Scratch surface is ready; `trigger` is the id of the start command
    Opened { trigger: MessageId },

    /// The user replied in the scratch surface
    Reply { text: String, message_id: MessageId },

    /// The reply window elapsed without a qualifying message
    ReplyTimedOut,

    /// The question was posted and persisted
    Published { surface: SurfaceId },

    PublishFailed { reason: String },
}

impl FlowEvent {
    pub fn reply(text: impl Into<String>, message_id: impl Into<String>) -> Self {
        FlowEvent::Reply {
            text: text.into(),
            message_id: MessageId::new(message_id),
        }
    }
}
