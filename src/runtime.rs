//! Runtime for executing question-building conversations
//!
//! `ConversationFlow` owns the session registry and executes effects from the
//! pure transition function. Waits registered with the `EventWaiter` resolve
//! into `RoutedEvent`s, which `FlowDriver` feeds back into the flow.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationFlow;
pub use traits::*;

use crate::chat::console::ConsoleChat;
use crate::chat::{ChatError, MessageId, SurfaceId, UserId, UserRef};
use crate::flow::{FlowEvent, FlowState, Outcome};
use crate::session::SessionError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Type alias for the production flow with concrete implementations
pub type ProductionFlow = ConversationFlow<Arc<ConsoleChat>, DatabaseStore>;

/// An event addressed to one user's conversation
#[derive(Debug)]
pub struct RoutedEvent {
    pub user: UserId,
    pub event: FlowEvent,
}

/// Progress broadcast to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowNotice {
    StateChanged { user: UserId, state: FlowState },
    /// The next reply wait is registered
    AwaitingReply { user: UserId },
    /// Session released
    Ended { user: UserId, outcome: Outcome },
}

impl FlowNotice {
    #[allow(dead_code)] // Used in tests
    pub fn user(&self) -> &UserId {
        match self {
            FlowNotice::StateChanged { user, .. }
            | FlowNotice::AwaitingReply { user }
            | FlowNotice::Ended { user, .. } => user,
        }
    }
}

/// Request to open a question builder
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub user: UserRef,
    /// Channel the start command was issued in
    pub channel: SurfaceId,
    /// Id of the start command message
    pub trigger: MessageId,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("You are already building a question.")]
    AlreadyActive(UserId),
    #[error("Questions can only be started in {expected}.")]
    WrongChannel { expected: SurfaceId },
    #[error("Could not open a question builder: {0}")]
    Chat(#[from] ChatError),
}

impl From<SessionError> for StartError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyActive(user) => StartError::AlreadyActive(user),
        }
    }
}

/// Drains resolved waits back into the flow
pub struct FlowDriver<C, S> {
    flow: ConversationFlow<C, S>,
    events: mpsc::UnboundedReceiver<RoutedEvent>,
}

impl<C, S> FlowDriver<C, S>
where
    C: crate::chat::ChatClient + 'static,
    S: QuestionStore + 'static,
{
    pub(crate) fn new(
        flow: ConversationFlow<C, S>,
        events: mpsc::UnboundedReceiver<RoutedEvent>,
    ) -> Self {
        Self { flow, events }
    }

    /// Process events until `shutdown` is cancelled. Each event runs in its
    /// own task; a user never has more than one event in flight.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Flow driver started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                routed = self.events.recv() => {
                    let Some(RoutedEvent { user, event }) = routed else { break };
                    let flow = self.flow.clone();
                    tokio::spawn(async move { flow.process(&user, event).await });
                }
            }
        }
        tracing::info!("Flow driver stopped");
    }
}
