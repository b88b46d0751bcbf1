//! Mock implementations for testing
//!
//! These mocks enable end-to-end testing of the flow without a chat platform.

use super::traits::*;
use super::{ConversationFlow, FlowNotice, StartError, StartRequest};
use crate::chat::{
    ChatClient, ChatError, InboundMessage, MessageId, OutgoingMessage, SurfaceId, UserId, UserRef,
};
use crate::config::FlowConfig;
use crate::db::QuestionRecord;
use crate::waiter::EventWaiter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Chat Client
// ============================================================================

/// One recorded call against the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Send {
        surface: SurfaceId,
        message: OutgoingMessage,
        id: MessageId,
    },
    DeleteMessage {
        surface: SurfaceId,
        message: MessageId,
    },
    Pin {
        surface: SurfaceId,
        message: MessageId,
    },
    CreateScratch {
        parent: SurfaceId,
        label: String,
        member: UserId,
        surface: SurfaceId,
    },
    CreatePermanent {
        parent: SurfaceId,
        title: String,
        surface: SurfaceId,
    },
    DeleteSurface {
        surface: SurfaceId,
    },
}

/// Mock chat client that records every call
#[derive(Default)]
pub struct MockChat {
    calls: Mutex<Vec<ChatCall>>,
    next_id: AtomicU64,
    fail_scratch: AtomicBool,
    fail_delete_surface: AtomicBool,
}

#[allow(dead_code)]
impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, call: ChatCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn set_fail_scratch(&self, fail: bool) {
        self.fail_scratch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete_surface(&self, fail: bool) {
        self.fail_delete_surface.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Flattened text of everything sent to `surface`, in order
    pub fn texts_in(&self, surface: &SurfaceId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChatCall::Send {
                    surface: s,
                    message,
                    ..
                } if &s == surface => Some(message.plain_text()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_surfaces(&self) -> Vec<SurfaceId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChatCall::DeleteSurface { surface } => Some(surface),
                _ => None,
            })
            .collect()
    }

    /// Permanent surfaces created, with their titles
    pub fn threads(&self) -> Vec<(SurfaceId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChatCall::CreatePermanent { surface, title, .. } => Some((surface, title)),
                _ => None,
            })
            .collect()
    }

    pub fn scratch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ChatCall::CreateScratch { .. }))
            .count()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn send_message(
        &self,
        surface: &SurfaceId,
        content: &OutgoingMessage,
    ) -> Result<MessageId, ChatError> {
        let id = MessageId::new(self.next("sent"));
        self.record(ChatCall::Send {
            surface: surface.clone(),
            message: content.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn delete_message(
        &self,
        surface: &SurfaceId,
        message: &MessageId,
    ) -> Result<(), ChatError> {
        self.record(ChatCall::DeleteMessage {
            surface: surface.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn pin_message(&self, surface: &SurfaceId, message: &MessageId) -> Result<(), ChatError> {
        self.record(ChatCall::Pin {
            surface: surface.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn create_scratch_surface(
        &self,
        parent: &SurfaceId,
        label: &str,
        member: &UserId,
    ) -> Result<SurfaceId, ChatError> {
        if self.fail_scratch.load(Ordering::SeqCst) {
            return Err(ChatError::Platform("missing permissions".to_string()));
        }
        let surface = SurfaceId::new(self.next("scratch"));
        self.record(ChatCall::CreateScratch {
            parent: parent.clone(),
            label: label.to_string(),
            member: member.clone(),
            surface: surface.clone(),
        });
        Ok(surface)
    }

    async fn create_permanent_surface(
        &self,
        parent: &SurfaceId,
        title: &str,
    ) -> Result<SurfaceId, ChatError> {
        let surface = SurfaceId::new(self.next("thread"));
        self.record(ChatCall::CreatePermanent {
            parent: parent.clone(),
            title: title.to_string(),
            surface: surface.clone(),
        });
        Ok(surface)
    }

    async fn delete_surface(&self, surface: &SurfaceId) -> Result<(), ChatError> {
        self.record(ChatCall::DeleteSurface {
            surface: surface.clone(),
        });
        if self.fail_delete_surface.load(Ordering::SeqCst) {
            return Err(ChatError::SurfaceNotFound(surface.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// In-Memory Question Store
// ============================================================================

#[derive(Default)]
pub struct InMemoryQuestionStore {
    records: Mutex<Vec<QuestionRecord>>,
    fail_next: AtomicBool,
}

#[allow(dead_code)]
impl InMemoryQuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `persist` call fail
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<QuestionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionStore for InMemoryQuestionStore {
    async fn persist(&self, question: &QuestionRecord) -> Result<(), StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.records.lock().unwrap().push(question.clone());
        Ok(())
    }
}

// ============================================================================
// Test Flow Harness
// ============================================================================

pub const ASK_CHANNEL: &str = "ask";
pub const QUESTION_CHANNEL: &str = "questions";
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

pub fn test_config() -> FlowConfig {
    FlowConfig {
        ask_channel: Some(SurfaceId::new(ASK_CHANNEL)),
        question_channel: SurfaceId::new(QUESTION_CHANNEL),
        reply_timeout: Duration::from_secs(300),
        code_language: "lua".to_string(),
    }
}

/// A running flow wired to mocks, with its driver spawned
pub struct TestFlow {
    pub flow: ConversationFlow<Arc<MockChat>, Arc<InMemoryQuestionStore>>,
    pub chat: Arc<MockChat>,
    pub store: Arc<InMemoryQuestionStore>,
    pub waiter: EventWaiter,
    notices: broadcast::Receiver<FlowNotice>,
    shutdown: CancellationToken,
    next_message: u64,
}

#[allow(dead_code)]
impl TestFlow {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        let chat = Arc::new(MockChat::new());
        let store = Arc::new(InMemoryQuestionStore::new());
        let waiter = EventWaiter::new();
        let (flow, driver) = ConversationFlow::new(config, chat.clone(), store.clone(), waiter.clone());
        let notices = flow.subscribe();
        let shutdown = CancellationToken::new();
        tokio::spawn(driver.run(shutdown.clone()));
        Self {
            flow,
            chat,
            store,
            waiter,
            notices,
            shutdown,
            next_message: 0,
        }
    }

    pub fn next_message_id(&mut self) -> MessageId {
        self.next_message += 1;
        MessageId::new(format!("m{}", self.next_message))
    }

    /// Start a conversation from the ask channel
    pub async fn ask(&mut self, user: &UserRef) -> Result<(), StartError> {
        let trigger = self.next_message_id();
        self.ask_with(user, SurfaceId::new(ASK_CHANNEL), trigger).await
    }

    pub async fn ask_with(
        &mut self,
        user: &UserRef,
        channel: SurfaceId,
        trigger: MessageId,
    ) -> Result<(), StartError> {
        self.flow
            .start(StartRequest {
                user: user.clone(),
                channel,
                trigger,
            })
            .await?;
        assert!(
            self.wait_for_step(&user.id, STEP_TIMEOUT).await.is_some(),
            "no wait registered after start"
        );
        Ok(())
    }

    pub fn scratch(&self, user: &UserRef) -> SurfaceId {
        self.flow
            .sessions()
            .surface_of(&user.id)
            .expect("user has no active session")
    }

    /// Post a message as `user` in their scratch surface without waiting
    pub fn say(&mut self, user: &UserRef, text: &str) -> usize {
        let message = InboundMessage {
            author: user.id.clone(),
            surface: self.scratch(user),
            id: self.next_message_id(),
            text: text.to_string(),
        };
        self.flow.handle_message(&message)
    }

    /// Post a reply and wait until the flow has handled it
    pub async fn reply(&mut self, user: &UserRef, text: &str) -> FlowNotice {
        assert_eq!(self.say(user, text), 1, "reply to {text:?} was not consumed");
        self.wait_for_step(&user.id, STEP_TIMEOUT)
            .await
            .unwrap_or_else(|| panic!("flow did not settle after {text:?}"))
    }

    /// Title, then an 8 word title, then body, then a 30 word body
    pub async fn fill_valid(&mut self, user: &UserRef) {
        self.reply(user, "title").await;
        self.reply(user, "How do I read a file in Lua").await;
        self.reply(user, "body").await;
        self.reply(user, &vec!["detail"; 30].join(" ")).await;
    }

    /// Next notice that ends a step for `user`: a new wait or the end
    pub async fn wait_for_step(&mut self, user: &UserId, timeout: Duration) -> Option<FlowNotice> {
        self.wait_for(timeout, |notice| {
            notice.user() == user
                && matches!(
                    notice,
                    FlowNotice::AwaitingReply { .. } | FlowNotice::Ended { .. }
                )
        })
        .await
    }

    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        predicate: impl Fn(&FlowNotice) -> bool,
    ) -> Option<FlowNotice> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.notices.recv()).await {
                Ok(Ok(notice)) if predicate(&notice) => return Some(notice),
                _ => continue,
            }
        }
        None
    }

    /// Notices already queued, without waiting
    pub fn drain_notices(&mut self) -> Vec<FlowNotice> {
        let mut drained = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            drained.push(notice);
        }
        drained
    }
}

impl Drop for TestFlow {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.waiter.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Field, FlowState, Outcome};

    fn alice() -> UserRef {
        UserRef::new("1", "alice")
    }

    fn bob() -> UserRef {
        UserRef::new("2", "bob")
    }

    fn ended(outcome: Outcome) -> FlowNotice {
        FlowNotice::Ended {
            user: alice().id,
            outcome,
        }
    }

    #[tokio::test]
    async fn test_mock_chat_records_calls() {
        let chat = MockChat::new();
        let surface = chat
            .create_scratch_surface(&SurfaceId::new("p"), "label", &UserId::new("1"))
            .await
            .unwrap();
        chat.send_message(&surface, &OutgoingMessage::text("hi"))
            .await
            .unwrap();
        chat.delete_surface(&surface).await.unwrap();

        assert_eq!(chat.texts_in(&surface), vec!["hi"]);
        assert_eq!(chat.deleted_surfaces(), vec![surface]);
        assert_eq!(chat.scratch_count(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_store_failure_is_one_shot() {
        let store = InMemoryQuestionStore::new();
        store.fail_next();
        let record = QuestionRecord {
            id: "q".to_string(),
            author_id: UserId::new("1"),
            title: "t".to_string(),
            body: "b".to_string(),
            codeblock: None,
            output: None,
            thread_id: SurfaceId::new("thread"),
            created_at: chrono::Utc::now(),
        };
        assert!(store.persist(&record).await.is_err());
        assert!(store.persist(&record).await.is_ok());
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_open_renders_welcome_and_menu() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();

        let scratch = t.scratch(&alice());
        let texts = t.chat.texts_in(&scratch);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("<@1>, Welcome to your personal Question Builder."));
        assert!(texts[0].contains("`quit`"));
        assert!(texts[1].starts_with("Question Builder"));

        assert!(matches!(
            t.chat.calls().first(),
            Some(ChatCall::CreateScratch { parent, label, member, .. })
                if parent.as_str() == QUESTION_CHANNEL
                    && label == "Question Building for alice"
                    && member == &alice().id
        ));
        assert_eq!(t.waiter.pending(), 1);
    }

    #[tokio::test]
    async fn test_happy_path_posts_question() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());

        t.fill_valid(&alice()).await;
        let notice = t.reply(&alice(), "done").await;
        assert_eq!(notice, ended(Outcome::Posted));

        let records = t.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "How do I read a file in Lua");
        assert_eq!(records[0].body.split_whitespace().count(), 30);
        assert_eq!(records[0].author_id, alice().id);

        let threads = t.chat.threads();
        assert_eq!(threads.len(), 1);
        let (thread, title) = &threads[0];
        assert_eq!(title, "How do I read a file in Lua");
        assert_eq!(&records[0].thread_id, thread);

        let posted = t.chat.texts_in(thread);
        assert_eq!(posted.len(), 1);
        assert!(posted[0].starts_with("**Question posted by: <@1>**"));
        assert!(t
            .chat
            .calls()
            .iter()
            .any(|call| matches!(call, ChatCall::Pin { surface, .. } if surface == thread)));

        assert_eq!(t.chat.deleted_surfaces(), vec![scratch]);
        assert!(!t.flow.sessions().is_active(&alice().id));
        assert_eq!(t.waiter.pending(), 0);
    }

    #[tokio::test]
    async fn test_done_with_empty_draft_lists_deficiencies() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());
        let before = t.chat.texts_in(&scratch).len();

        let notice = t.reply(&alice(), "done").await;
        assert_eq!(notice, FlowNotice::AwaitingReply { user: alice().id });

        let texts = t.chat.texts_in(&scratch);
        let new = &texts[before..];
        assert_eq!(new.len(), 3);
        assert!(new[0].contains("no title"));
        assert!(new[1].contains("no body"));
        assert!(new[2].starts_with("Question Builder"));

        assert!(t.store.records().is_empty());
        assert!(t.chat.threads().is_empty());
        let session = t.flow.sessions().get(&alice().id).unwrap();
        assert_eq!(session.state, FlowState::Menu);
    }

    #[tokio::test]
    async fn test_short_title_rejected_at_done() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());

        t.reply(&alice(), "title").await;
        t.reply(&alice(), "one two three four five").await;
        t.reply(&alice(), "body").await;
        t.reply(&alice(), &vec!["word"; 25].join(" ")).await;
        t.reply(&alice(), "done").await;

        let texts = t.chat.texts_in(&scratch);
        assert!(texts
            .iter()
            .any(|text| text.contains("(5 words, at least 6 needed)")));
        assert!(t.store.records().is_empty());
        assert!(t.flow.sessions().is_active(&alice().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_once() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());

        t.reply(&alice(), "title").await;
        let notice = t
            .wait_for_step(&alice().id, Duration::from_secs(600))
            .await;
        assert_eq!(notice, Some(ended(Outcome::TimedOut)));

        let texts = t.chat.texts_in(&scratch);
        assert!(texts
            .last()
            .is_some_and(|text| text.contains("took longer than 5 minutes to respond, <@1>!")));
        assert!(t
            .chat
            .texts_in(&SurfaceId::new(ASK_CHANNEL))
            .iter()
            .any(|text| text.contains("took longer than 5 minutes to respond, <@1>!")));
        assert_eq!(t.chat.deleted_surfaces(), vec![scratch]);
        assert!(!t.flow.sessions().is_active(&alice().id));

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert!(!t
            .drain_notices()
            .iter()
            .any(|n| matches!(n, FlowNotice::Ended { .. })));
        assert_eq!(t.chat.deleted_surfaces().len(), 1);
        assert_eq!(t.waiter.pending(), 0);
    }

    #[tokio::test]
    async fn test_quit_from_menu() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());

        assert_eq!(t.reply(&alice(), "quit").await, ended(Outcome::Cancelled));
        assert!(t
            .chat
            .texts_in(&scratch)
            .iter()
            .any(|text| text == "Question building cancelled."));
        let calls = t.chat.calls();
        let deleted_quit = calls.iter().position(|call| {
            matches!(call, ChatCall::DeleteMessage { surface, message }
                if surface == &scratch && message.as_str().starts_with('m'))
        });
        let deleted_scratch = calls
            .iter()
            .position(|call| matches!(call, ChatCall::DeleteSurface { .. }));
        assert!(deleted_quit.is_some_and(|i| deleted_scratch.is_some_and(|j| i < j)));
        assert_eq!(t.chat.deleted_surfaces(), vec![scratch]);
        assert!(!t.flow.sessions().is_active(&alice().id));
    }

    #[tokio::test]
    async fn test_stop_while_editing_discards_edit() {
        let mut t = TestFlow::new();
        t.ask(&bob()).await.unwrap();

        t.reply(&bob(), "body").await;
        let notice = t.reply(&bob(), "Stop").await;
        assert_eq!(
            notice,
            FlowNotice::Ended {
                user: bob().id,
                outcome: Outcome::Cancelled
            }
        );
        assert!(t.store.records().is_empty());
        assert!(!t.flow.sessions().is_active(&bob().id));
    }

    #[tokio::test]
    async fn test_back_leaves_field_unchanged() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();

        t.reply(&alice(), "title").await;
        t.reply(&alice(), "original title").await;
        t.reply(&alice(), "title").await;
        t.reply(&alice(), "BACK").await;

        let session = t.flow.sessions().get(&alice().id).unwrap();
        assert_eq!(session.state, FlowState::Menu);
        assert_eq!(session.draft.get(Field::Title), Some("original title"));
    }

    #[tokio::test]
    async fn test_second_start_rejected_until_ended() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();

        assert!(matches!(
            t.ask(&alice()).await,
            Err(StartError::AlreadyActive(user)) if user == alice().id
        ));
        assert_eq!(t.chat.scratch_count(), 1);

        t.reply(&alice(), "quit").await;
        t.ask(&alice()).await.unwrap();
        assert_eq!(t.chat.scratch_count(), 2);
    }

    #[tokio::test]
    async fn test_wrong_channel_rejected() {
        let mut t = TestFlow::new();
        let trigger = t.next_message_id();
        let result = t
            .ask_with(&alice(), SurfaceId::new("general"), trigger)
            .await;

        assert!(matches!(
            result,
            Err(StartError::WrongChannel { expected }) if expected.as_str() == ASK_CHANNEL
        ));
        assert!(!t.flow.sessions().is_active(&alice().id));
        assert!(t.chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_any_channel_accepted_without_ask_channel() {
        let mut t = TestFlow::with_config(FlowConfig {
            ask_channel: None,
            ..test_config()
        });
        let trigger = t.next_message_id();
        t.ask_with(&alice(), SurfaceId::new("general"), trigger)
            .await
            .unwrap();
        assert!(t.flow.sessions().is_active(&alice().id));
    }

    #[tokio::test]
    async fn test_scratch_creation_failure_releases_user() {
        let mut t = TestFlow::new();
        t.chat.set_fail_scratch(true);

        assert!(matches!(t.ask(&alice()).await, Err(StartError::Chat(_))));
        assert!(!t.flow.sessions().is_active(&alice().id));
        assert_eq!(t.waiter.pending(), 0);

        t.chat.set_fail_scratch(false);
        t.ask(&alice()).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_and_trigger_messages_ignored() {
        let mut t = TestFlow::new();
        let trigger = MessageId::new("cmd-1");
        t.ask_with(&alice(), SurfaceId::new(ASK_CHANNEL), trigger.clone())
            .await
            .unwrap();
        let scratch = t.scratch(&alice());

        let foreign = InboundMessage {
            author: bob().id,
            surface: scratch.clone(),
            id: MessageId::new("x1"),
            text: "title".to_string(),
        };
        let elsewhere = InboundMessage {
            author: alice().id,
            surface: SurfaceId::new(ASK_CHANNEL),
            id: MessageId::new("x2"),
            text: "title".to_string(),
        };
        let echo = InboundMessage {
            author: alice().id,
            surface: scratch,
            id: trigger,
            text: "title".to_string(),
        };
        assert_eq!(t.flow.handle_message(&foreign), 0);
        assert_eq!(t.flow.handle_message(&elsewhere), 0);
        assert_eq!(t.flow.handle_message(&echo), 0);
        assert_eq!(t.waiter.pending(), 1);

        t.reply(&alice(), "title").await;
        let session = t.flow.sessions().get(&alice().id).unwrap();
        assert_eq!(session.state, FlowState::Editing { field: Field::Title });
    }

    #[tokio::test]
    async fn test_codeblock_and_output_are_fenced() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();

        t.reply(&alice(), "codeblock").await;
        t.reply(&alice(), "```python\nprint('hi')\n```").await;
        t.reply(&alice(), "output").await;
        t.reply(&alice(), "`hi`").await;

        let draft = t.flow.sessions().get(&alice().id).unwrap().draft;
        assert_eq!(draft.codeblock.as_deref(), Some("```lua\nprint('hi')\n```"));
        assert_eq!(draft.output.as_deref(), Some("```\nhi\n```"));

        t.fill_valid(&alice()).await;
        t.reply(&alice(), "done").await;

        let (thread, _) = t.chat.threads().remove(0);
        let posted = t.chat.texts_in(&thread);
        assert_eq!(posted.len(), 3);
        assert_eq!(posted[1], "```lua\nprint('hi')\n```");
        assert_eq!(posted[2], "```\nhi\n```");
        assert_eq!(
            t.store.records()[0].codeblock.as_deref(),
            Some("```lua\nprint('hi')\n```")
        );
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_draft_for_retry() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());
        t.fill_valid(&alice()).await;

        t.store.fail_next();
        let notice = t.reply(&alice(), "done").await;
        assert_eq!(notice, FlowNotice::AwaitingReply { user: alice().id });

        let (failed_thread, _) = t.chat.threads().remove(0);
        assert_eq!(t.chat.deleted_surfaces(), vec![failed_thread]);
        assert!(t.store.records().is_empty());
        assert!(t
            .chat
            .texts_in(&scratch)
            .iter()
            .any(|text| text.contains("could not be posted (Store unavailable: disk full)")));

        let session = t.flow.sessions().get(&alice().id).unwrap();
        assert_eq!(session.state, FlowState::Menu);
        assert!(session.draft.is_set(Field::Title));

        assert_eq!(t.reply(&alice(), "done").await, ended(Outcome::Posted));
        assert_eq!(t.store.records().len(), 1);
        assert_eq!(t.chat.threads().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_surface_failure_still_frees_user() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        t.chat.set_fail_delete_surface(true);

        assert_eq!(t.reply(&alice(), "quit").await, ended(Outcome::Cancelled));
        assert!(!t.flow.sessions().is_active(&alice().id));
        t.ask(&alice()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_input_keeps_single_wait() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        let scratch = t.scratch(&alice());

        t.reply(&alice(), "hello").await;
        t.reply(&alice(), "what").await;

        assert_eq!(t.waiter.pending(), 1);
        assert!(t
            .chat
            .texts_in(&scratch)
            .iter()
            .any(|text| text.contains("`hello` is not an option")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_input_restarts_reply_window() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(240)).await;
        t.reply(&alice(), "hello").await;
        let replied_at = tokio::time::Instant::now();

        // Past the first window, inside the fresh one
        tokio::time::sleep(Duration::from_secs(240)).await;
        assert!(t.flow.sessions().is_active(&alice().id));
        assert!(!t
            .drain_notices()
            .iter()
            .any(|n| matches!(n, FlowNotice::Ended { .. })));

        let notice = t
            .wait_for_step(&alice().id, Duration::from_secs(600))
            .await;
        assert_eq!(notice, Some(ended(Outcome::TimedOut)));
        let elapsed = replied_at.elapsed();
        assert!(
            elapsed >= Duration::from_secs(299) && elapsed < Duration::from_secs(301),
            "timed out {elapsed:?} after the unrecognized reply"
        );
    }

    #[tokio::test]
    async fn test_users_progress_independently() {
        let mut t = TestFlow::new();
        t.ask(&alice()).await.unwrap();
        t.ask(&bob()).await.unwrap();
        assert_eq!(t.waiter.pending(), 2);

        t.reply(&alice(), "title").await;
        t.reply(&bob(), "quit").await;

        let session = t.flow.sessions().get(&alice().id).unwrap();
        assert_eq!(session.state, FlowState::Editing { field: Field::Title });
        assert!(!t.flow.sessions().is_active(&bob().id));
        assert_eq!(t.waiter.pending(), 1);
    }
}
