//! Pure state transition function
//!
//! Every (state, input) pair the builder understands is one arm of the match
//! in [`transition`]. The function performs no I/O; the runtime executes the
//! returned effects in order.

use super::prompt;
use super::state::{Field, FlowContext, FlowState, QuestionDraft};
use super::{Effect, FlowEvent, Outcome};
use crate::chat::MessageId;
use thiserror::Error;

pub const MIN_TITLE_WORDS: usize = 6;
pub const MIN_BODY_WORDS: usize = 25;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: FlowState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: FlowState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Conversation already ended ({0})")]
    Terminal(&'static str),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Why a draft cannot be posted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deficiency {
    Missing(Field),
    TooShort { field: Field, words: usize, min: usize },
}

impl Deficiency {
    pub fn field(&self) -> Field {
        match self {
            Deficiency::Missing(field) | Deficiency::TooShort { field, .. } => *field,
        }
    }
}

/// A reply classified against the keyword table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Field(Field),
    Done,
    Back,
    Quit,
    Other,
}

fn classify(text: &str) -> Keyword {
    let word = text.trim();
    if let Some(field) = Field::from_keyword(word) {
        Keyword::Field(field)
    } else if word.eq_ignore_ascii_case("done") {
        Keyword::Done
    } else if word.eq_ignore_ascii_case("back") {
        Keyword::Back
    } else if word.eq_ignore_ascii_case("quit") || word.eq_ignore_ascii_case("stop") {
        Keyword::Quit
    } else {
        Keyword::Other
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Check the mandatory fields, reporting every problem found
pub fn validate(draft: &QuestionDraft) -> Vec<Deficiency> {
    [(Field::Title, MIN_TITLE_WORDS), (Field::Body, MIN_BODY_WORDS)]
        .into_iter()
        .filter_map(|(field, min)| match draft.get(field) {
            None => Some(Deficiency::Missing(field)),
            Some(value) => {
                let words = word_count(value);
                (words < min).then_some(Deficiency::TooShort { field, words, min })
            }
        })
        .collect()
}

fn is_fence_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("```")
        && trimmed
            .trim_start_matches('`')
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '#'))
}

/// Drop an opening fence and its language tag, even when code follows on
/// the same line
fn strip_opening_fence<'a>(raw: &'a str, code_language: &str) -> &'a str {
    let trimmed = raw.trim_start();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.trim_start_matches('`');
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '#')))
        .unwrap_or(rest.len());
    let (tag, after) = rest.split_at(tag_len);
    let is_tag = after.is_empty()
        || after.starts_with(['\n', '\r'])
        || (!tag.is_empty() && tag.eq_ignore_ascii_case(code_language));
    if is_tag {
        after.trim_start_matches([' ', '\t'])
    } else {
        rest
    }
}

/// Normalise a raw reply into the stored value of `field`
pub fn post_process(field: Field, raw: &str, code_language: &str) -> String {
    match field {
        Field::Title | Field::Body => raw.to_string(),
        Field::Codeblock => {
            let code = strip_opening_fence(raw, code_language)
                .lines()
                .filter(|line| !is_fence_line(line))
                .collect::<Vec<_>>()
                .join("\n")
                .replace('`', "");
            format!("```{code_language}\n{}\n```", code.trim_matches('\n'))
        }
        Field::Output => format!("```\n{}\n```", raw.replace('`', "").trim_matches('\n')),
    }
}

/// Effects that re-enter the menu: summary, then a fresh wait
fn back_to_menu(draft: &QuestionDraft, after: MessageId) -> [Effect; 2] {
    [
        Effect::say(prompt::menu(draft)),
        Effect::AwaitReply { after },
    ]
}

/// `quit` is removed from the scratch surface before the builder closes
fn cancel(message: MessageId) -> TransitionResult {
    TransitionResult::new(FlowState::Cancelled)
        .with_effect(Effect::DeleteMessage { message })
        .with_effect(Effect::say(prompt::cancelled()))
        .with_effect(Effect::Teardown {
            outcome: Outcome::Cancelled,
        })
}

/// Pure transition function
pub fn transition(
    state: &FlowState,
    draft: &QuestionDraft,
    context: &FlowContext,
    event: FlowEvent,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        (state, _) if state.is_terminal() => Err(TransitionError::Terminal(state.name())),

        // ============================================================
        // Opening
        // ============================================================
        (FlowState::Menu, FlowEvent::Opened { trigger }) => {
            Ok(TransitionResult::new(FlowState::Menu)
                .with_effect(Effect::say(prompt::welcome(&context.user)))
                .with_effects(back_to_menu(draft, trigger)))
        }

        // ============================================================
        // Menu
        // ============================================================
        (FlowState::Menu, FlowEvent::Reply { text, message_id }) => match classify(&text) {
            Keyword::Field(field) => Ok(TransitionResult::new(FlowState::Editing { field })
                .with_effect(Effect::say(prompt::field_prompt(field)))
                .with_effect(Effect::AwaitReply { after: message_id })),

            Keyword::Done => {
                let problems = validate(draft);
                if problems.is_empty() {
                    Ok(TransitionResult::new(FlowState::Completing {
                        trigger: message_id,
                    })
                    .with_effect(Effect::Publish))
                } else {
                    Ok(TransitionResult::new(FlowState::Menu)
                        .with_effects(
                            problems
                                .iter()
                                .map(|problem| Effect::say(prompt::deficiency(problem))),
                        )
                        .with_effects(back_to_menu(draft, message_id)))
                }
            }

            Keyword::Quit => Ok(cancel(message_id)),

            // Unknown input gets a fresh wait with a full reply window
            Keyword::Back | Keyword::Other => Ok(TransitionResult::new(FlowState::Menu)
                .with_effect(Effect::say(prompt::unrecognized(&text)))
                .with_effects(back_to_menu(draft, message_id))),
        },

        // ============================================================
        // Editing a field
        // ============================================================
        (FlowState::Editing { field }, FlowEvent::Reply { text, message_id }) => {
            match classify(&text) {
                Keyword::Quit => Ok(cancel(message_id)),
                Keyword::Back => Ok(TransitionResult::new(FlowState::Menu)
                    .with_effects(back_to_menu(draft, message_id))),
                _ => {
                    let value = post_process(*field, &text, &context.code_language);
                    let mut updated = draft.clone();
                    updated.set(*field, value.clone());
                    Ok(TransitionResult::new(FlowState::Menu)
                        .with_effect(Effect::StoreField {
                            field: *field,
                            value,
                        })
                        .with_effects(back_to_menu(&updated, message_id)))
                }
            }
        }

        // ============================================================
        // Timeout
        // ============================================================
        (state, FlowEvent::ReplyTimedOut) if state.awaits_reply() => {
            let notice = prompt::timed_out(&context.user, context.reply_timeout);
            Ok(TransitionResult::new(FlowState::TimedOut)
                .with_effect(Effect::say(notice.clone()))
                .with_effect(Effect::Announce(notice))
                .with_effect(Effect::Teardown {
                    outcome: Outcome::TimedOut,
                }))
        }

        // ============================================================
        // Completion
        // ============================================================
        (FlowState::Completing { .. }, FlowEvent::Published { .. }) => {
            Ok(TransitionResult::new(FlowState::Posted).with_effect(Effect::Teardown {
                outcome: Outcome::Posted,
            }))
        }

        (FlowState::Completing { trigger }, FlowEvent::PublishFailed { reason }) => {
            Ok(TransitionResult::new(FlowState::Menu)
                .with_effect(Effect::say(prompt::publish_failed(&reason)))
                .with_effects(back_to_menu(draft, trigger.clone())))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {}",
            state.name()
        ))),
    }
}
