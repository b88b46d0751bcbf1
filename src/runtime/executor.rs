//! Conversation flow executor

use super::traits::{QuestionStore, StoreError};
use super::{FlowDriver, FlowNotice, RoutedEvent, StartError, StartRequest};

use crate::chat::{
    ChatClient, ChatError, InboundMessage, MessageId, OutgoingMessage, SurfaceId, UserId, UserRef,
};
use crate::config::FlowConfig;
use crate::db::QuestionRecord;
use crate::flow::prompt;
use crate::flow::{transition, Effect, FlowContext, FlowEvent, QuestionDraft};
use crate::session::SessionRegistry;
use crate::waiter::EventWaiter;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
enum PublishError {
    #[error("the conversation has already ended")]
    Ended,
    #[error("the question is incomplete")]
    Incomplete,
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Inner<C, S> {
    config: FlowConfig,
    chat: C,
    store: S,
    sessions: SessionRegistry,
    waiter: EventWaiter,
    event_tx: mpsc::UnboundedSender<RoutedEvent>,
    notices: broadcast::Sender<FlowNotice>,
}

/// Generic conversation flow that can work with any chat and store implementations
pub struct ConversationFlow<C, S> {
    inner: Arc<Inner<C, S>>,
}

impl<C, S> Clone for ConversationFlow<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S> ConversationFlow<C, S>
where
    C: ChatClient + 'static,
    S: QuestionStore + 'static,
{
    /// Build a flow and the driver that feeds resolved waits back into it.
    /// The driver must be run for conversations to progress past their first prompt.
    pub fn new(
        config: FlowConfig,
        chat: C,
        store: S,
        waiter: EventWaiter,
    ) -> (Self, FlowDriver<C, S>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let flow = Self {
            inner: Arc::new(Inner {
                config,
                chat,
                store,
                sessions: SessionRegistry::new(),
                waiter,
                event_tx,
                notices,
            }),
        };
        let driver = FlowDriver::new(flow.clone(), event_rx);
        (flow, driver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowNotice> {
        self.inner.notices.subscribe()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// Feed one inbound message to the pending waits
    pub fn handle_message(&self, message: &InboundMessage) -> usize {
        self.inner.waiter.dispatch(message)
    }

    fn notify(&self, notice: FlowNotice) {
        // No subscribers is fine
        let _ = self.inner.notices.send(notice);
    }

    /// Open a question builder for the requesting user.
    ///
    /// Reserves the user, creates their scratch surface and renders the
    /// first prompt. Returns once the first reply wait is registered.
    pub async fn start(&self, request: StartRequest) -> Result<(), StartError> {
        let StartRequest {
            user,
            channel,
            trigger,
        } = request;
        let config = &self.inner.config;

        if let Some(expected) = &config.ask_channel {
            if &channel != expected {
                return Err(StartError::WrongChannel {
                    expected: expected.clone(),
                });
            }
        }

        self.inner.sessions.start(user.clone())?;
        self.inner
            .sessions
            .update(&user.id, |s| s.origin = Some(channel.clone()));

        let label = format!("Question Building for {}", user.display_name);
        let surface = match self
            .inner
            .chat
            .create_scratch_surface(&config.question_channel, &label, &user.id)
            .await
        {
            Ok(surface) => surface,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to create scratch surface");
                self.inner.sessions.end(&user.id);
                return Err(e.into());
            }
        };
        self.inner.sessions.attach_surface(&user.id, surface.clone());

        tracing::info!(user_id = %user.id, surface = %surface, "Started question builder");
        self.process(&user.id, FlowEvent::Opened { trigger }).await;
        Ok(())
    }

    /// Run one event through the transition function and execute its effects
    pub async fn process(&self, user_id: &UserId, event: FlowEvent) {
        // Events generated by effects are processed in a loop - no recursion
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let Some(session) = self.inner.sessions.get(user_id) else {
                tracing::debug!(user_id = %user_id, event = ?current_event, "No session, dropping event");
                return;
            };
            let Some(surface) = session.surface.clone() else {
                tracing::warn!(user_id = %user_id, "Session has no scratch surface, releasing");
                self.inner.sessions.end(user_id);
                return;
            };

            let context = FlowContext::new(
                session.user.clone(),
                &self.inner.config.code_language,
                self.inner.config.reply_timeout,
            );
            let result = match transition(&session.state, &session.draft, &context, current_event) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(user_id = %user_id, error = %e, "Event rejected");
                    return;
                }
            };

            if result.new_state != session.state {
                let state = result.new_state.clone();
                self.inner
                    .sessions
                    .update(user_id, |s| s.state = state.clone());
                let state_json = serde_json::to_value(&state).unwrap_or(Value::Null);
                tracing::info!(user_id = %user_id, state = %state_json, "State changed");
                self.notify(FlowNotice::StateChanged {
                    user: user_id.clone(),
                    state,
                });
            }

            for effect in result.effects {
                if let Some(generated_event) =
                    self.execute_effect(&session.user, &surface, effect).await
                {
                    events_to_process.push(generated_event);
                }
            }
        }
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(
        &self,
        user: &UserRef,
        surface: &SurfaceId,
        effect: Effect,
    ) -> Option<FlowEvent> {
        match effect {
            Effect::Say(message) => {
                if let Err(e) = self.inner.chat.send_message(surface, &message).await {
                    tracing::warn!(user_id = %user.id, error = %e, "Failed to send message");
                }
                None
            }

            Effect::Announce(message) => {
                let origin = self
                    .inner
                    .sessions
                    .get(&user.id)
                    .and_then(|session| session.origin);
                if let Some(origin) = origin {
                    if let Err(e) = self.inner.chat.send_message(&origin, &message).await {
                        tracing::warn!(user_id = %user.id, channel = %origin, error = %e, "Failed to announce");
                    }
                }
                None
            }

            Effect::DeleteMessage { message } => {
                if let Err(e) = self.inner.chat.delete_message(surface, &message).await {
                    tracing::warn!(user_id = %user.id, message = %message, error = %e, "Failed to delete message");
                }
                None
            }

            Effect::StoreField { field, value } => {
                self.inner
                    .sessions
                    .update(&user.id, |s| s.draft.set(field, value));
                tracing::debug!(user_id = %user.id, field = %field, "Stored field");
                None
            }

            Effect::AwaitReply { after } => {
                self.await_reply(user.id.clone(), surface.clone(), after);
                self.notify(FlowNotice::AwaitingReply {
                    user: user.id.clone(),
                });
                None
            }

            Effect::Publish => match self.publish(user).await {
                Ok(thread) => {
                    tracing::info!(user_id = %user.id, thread = %thread, "Question posted");
                    Some(FlowEvent::Published { surface: thread })
                }
                Err(e) => {
                    tracing::warn!(user_id = %user.id, error = %e, "Failed to post question");
                    Some(FlowEvent::PublishFailed {
                        reason: e.to_string(),
                    })
                }
            },

            Effect::Teardown { outcome } => {
                if let Err(e) = self.inner.chat.delete_surface(surface).await {
                    tracing::warn!(user_id = %user.id, surface = %surface, error = %e, "Failed to delete scratch surface");
                }
                let duration_secs = self
                    .inner
                    .sessions
                    .end(&user.id)
                    .map(|session| (Utc::now() - session.started_at).num_seconds());
                tracing::info!(user_id = %user.id, ?outcome, ?duration_secs, "Question builder ended");
                self.notify(FlowNotice::Ended {
                    user: user.id.clone(),
                    outcome,
                });
                None
            }
        }
    }

    /// Register the one pending wait for `user` in their scratch surface
    fn await_reply(&self, user: UserId, surface: SurfaceId, after: MessageId) {
        let on_match = {
            let tx = self.inner.event_tx.clone();
            let user = user.clone();
            move |message: InboundMessage| {
                let _ = tx.send(RoutedEvent {
                    user,
                    event: FlowEvent::Reply {
                        text: message.text,
                        message_id: message.id,
                    },
                });
            }
        };
        let on_timeout = {
            let tx = self.inner.event_tx.clone();
            let user = user.clone();
            move || {
                let _ = tx.send(RoutedEvent {
                    user,
                    event: FlowEvent::ReplyTimedOut,
                });
            }
        };
        self.inner.waiter.register(
            move |message| message.author == user && message.surface == surface && message.id != after,
            on_match,
            self.inner.config.reply_timeout,
            on_timeout,
        );
    }

    /// Create the permanent thread, post the question and persist it.
    /// On failure the thread is removed again so a retry starts clean.
    async fn publish(&self, user: &UserRef) -> Result<SurfaceId, PublishError> {
        let draft = self
            .inner
            .sessions
            .get(&user.id)
            .map(|session| session.draft)
            .ok_or(PublishError::Ended)?;
        let title = draft.title.clone().ok_or(PublishError::Incomplete)?;

        let thread = self
            .inner
            .chat
            .create_permanent_surface(&self.inner.config.question_channel, &title)
            .await?;

        match self.post_question(user, &thread, &title, &draft).await {
            Ok(()) => Ok(thread),
            Err(e) => {
                if let Err(cleanup) = self.inner.chat.delete_surface(&thread).await {
                    tracing::warn!(thread = %thread, error = %cleanup, "Failed to remove partial question thread");
                }
                Err(e)
            }
        }
    }

    async fn post_question(
        &self,
        user: &UserRef,
        thread: &SurfaceId,
        title: &str,
        draft: &QuestionDraft,
    ) -> Result<(), PublishError> {
        let chat = &self.inner.chat;
        let body = draft.body.clone().ok_or(PublishError::Incomplete)?;

        let header = chat
            .send_message(thread, &prompt::posted_header(user, &body))
            .await?;
        if let Err(e) = chat.pin_message(thread, &header).await {
            tracing::warn!(thread = %thread, error = %e, "Failed to pin question header");
        }
        for extra in [&draft.codeblock, &draft.output].into_iter().flatten() {
            chat.send_message(thread, &OutgoingMessage::text(extra.clone()))
                .await?;
        }

        let record = QuestionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: user.id.clone(),
            title: title.to_string(),
            body,
            codeblock: draft.codeblock.clone(),
            output: draft.output.clone(),
            thread_id: thread.clone(),
            created_at: Utc::now(),
        };
        self.inner.store.persist(&record).await?;
        Ok(())
    }
}
