//! Effects produced by state transitions

use super::state::Field;
use crate::chat::{MessageId, OutgoingMessage};
use serde::{Deserialize, Serialize};

/// How a conversation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Posted,
    Cancelled,
    TimedOut,
}

/// Effects to be executed after a state transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a message to the scratch surface
    Say(OutgoingMessage),

    /// Send a message to the channel the conversation was started from
    Announce(OutgoingMessage),

    /// Delete one of the user's messages in the scratch surface
    DeleteMessage { message: MessageId },

    /// Write a post-processed value into the session draft
    StoreField { field: Field, value: String },

    /// Register the next reply wait. Messages with id `after` are ignored.
    AwaitReply { after: MessageId },

    /// Create the permanent surface, post the question and persist it
    Publish,

    /// Delete the scratch surface and release the user
    Teardown { outcome: Outcome },
}

impl Effect {
    pub fn say(message: OutgoingMessage) -> Self {
        Effect::Say(message)
    }

    /// Whether this effect hands control to a later event or ends the session
    pub fn is_continuation(&self) -> bool {
        matches!(
            self,
            Effect::AwaitReply { .. } | Effect::Publish | Effect::Teardown { .. }
        )
    }
}
