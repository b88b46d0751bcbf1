//! Message content shown to the user during a build

use super::state::{Field, QuestionDraft};
use super::transition::Deficiency;
use crate::chat::{Colour, Embed, OutgoingMessage, UserRef};
use std::time::Duration;

const FOOTER: &str = "Reply `quit` to stop.";
const BLANK: &str = "\u{200b}";

/// Keywords accepted in the menu, in display order
pub fn menu_keywords() -> String {
    Field::ALL
        .iter()
        .map(|field| field.keyword())
        .chain(["done", "quit"])
        .map(|keyword| format!("`{keyword}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn welcome(user: &UserRef) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "{}, Welcome to your personal Question Builder.\n\
         If at any point in time, you want to quit building, say `quit`.",
        user.mention()
    ))
}

/// Field completion summary
pub fn menu(draft: &QuestionDraft) -> OutgoingMessage {
    let mut embed = Embed::new("Question Builder", Colour::PROMPT);
    for field in Field::ALL {
        let status = match (draft.is_set(field), field.is_mandatory()) {
            (true, _) => "✅ set",
            (false, true) => "❌ not set (required)",
            (false, false) => "➖ not set (optional)",
        };
        embed = embed.field(field.label(), status, true);
    }
    embed = embed.field(
        "Commands",
        format!(
            "Reply with a field name to edit it, `done` to post, or `quit` to stop.\n{}",
            menu_keywords()
        ),
        false,
    );
    OutgoingMessage::embed(embed.footer(FOOTER))
}

pub fn field_prompt(field: Field) -> OutgoingMessage {
    let text = match field {
        Field::Title => {
            "Please provide what the title of your question should be.\n\
             A good question title is short and to the point."
        }
        Field::Body => {
            "Please provide what the body of your question should be.\n\
             A good question body is descriptive and clarifies what your end goal is."
        }
        Field::Codeblock => "Please provide any codeblocks relevant to your question.",
        Field::Output => "Please provide any output relevant to your question.",
    };
    let embed = Embed::new(field.label(), Colour::PROMPT)
        .field(BLANK, format!("{text}\nReply `back` to return to the menu."), true)
        .footer(FOOTER);
    OutgoingMessage::embed(embed)
}

pub fn unrecognized(input: &str) -> OutgoingMessage {
    let embed = Embed::new("Unknown option", Colour::ATTENTION)
        .field(
            BLANK,
            format!(
                "`{}` is not an option. Reply with one of: {}",
                input.trim(),
                menu_keywords()
            ),
            true,
        )
        .footer(FOOTER);
    OutgoingMessage::embed(embed)
}

pub fn deficiency(problem: &Deficiency) -> OutgoingMessage {
    let text = match problem {
        Deficiency::Missing(field) => format!(
            "Your question has no {}. Reply `{}` to add one.",
            field.keyword(),
            field.keyword()
        ),
        Deficiency::TooShort { field, words, min } => match field {
            Field::Title => format!(
                "Your title was not descriptive enough ({words} words, at least {min} needed), \
                 please try a better title."
            ),
            _ => format!(
                "Your {} was not descriptive enough ({words} words, at least {min} needed), \
                 please provide more details.",
                field.keyword()
            ),
        },
    };
    let embed = Embed::new(problem.field().label(), Colour::ATTENTION)
        .field(BLANK, text, true)
        .footer(FOOTER);
    OutgoingMessage::embed(embed)
}

pub fn cancelled() -> OutgoingMessage {
    OutgoingMessage::text("Question building cancelled.")
}

pub fn timed_out(user: &UserRef, window: Duration) -> OutgoingMessage {
    let secs = window.as_secs();
    let window = if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        format!("{minutes} minute{}", if minutes == 1 { "" } else { "s" })
    } else {
        format!("{secs} second{}", if secs == 1 { "" } else { "s" })
    };
    OutgoingMessage::text(format!(
        "Uh oh! You took longer than {window} to respond, {}!",
        user.mention()
    ))
}

pub fn publish_failed(reason: &str) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Your question could not be posted ({reason}). Your answers are kept, reply `done` to try again."
    ))
}

/// First message of the posted question
pub fn posted_header(user: &UserRef, body: &str) -> OutgoingMessage {
    OutgoingMessage::text(format!("**Question posted by: {}**\n\n{body}", user.mention()))
}
