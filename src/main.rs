//! Question Builder - guided question posting for chat communities
//!
//! Walks a user through building a question in a private scratch thread,
//! validates it, then posts it to a public thread and records it in SQLite.
//! This binary drives the flow from stdin through the console chat client.

mod chat;
mod config;
mod db;
mod flow;
mod runtime;
mod session;
mod waiter;

use chat::console::{parse_line, ConsoleChat, ConsoleInput};
use chat::{ChatClient, InboundMessage, OutgoingMessage, SurfaceId, UserId, UserRef};
use config::Config;
use db::Database;
use runtime::{ConversationFlow, DatabaseStore, ProductionFlow, StartRequest};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waiter::EventWaiter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout belongs to the console chat
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "question_builder=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let ask_channel = config
        .flow
        .ask_channel
        .clone()
        .unwrap_or_else(|| config.flow.question_channel.clone());
    let chat = Arc::new(ConsoleChat::new([
        ask_channel.clone(),
        config.flow.question_channel.clone(),
    ]));

    let waiter = EventWaiter::new();
    let (flow, driver): (ProductionFlow, _) = ConversationFlow::new(
        config.flow.clone(),
        chat.clone(),
        DatabaseStore::new(db.clone()),
        waiter.clone(),
    );
    let shutdown = CancellationToken::new();
    let driver_task = tokio::spawn(driver.run(shutdown.clone()));

    tracing::info!(
        ask_channel = %ask_channel,
        question_channel = %config.flow.question_channel,
        reply_timeout_secs = config.flow.reply_timeout.as_secs(),
        "Question builder ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                handle_line(&flow, &chat, &db, &ask_channel, &line).await;
            }
        }
    }

    shutdown.cancel();
    waiter.shutdown();
    driver_task.await?;
    tracing::info!(
        active = flow.sessions().active_count(),
        "Question builder stopped"
    );
    Ok(())
}

async fn handle_line(
    flow: &ProductionFlow,
    chat: &ConsoleChat,
    db: &Database,
    ask_channel: &SurfaceId,
    line: &str,
) {
    match parse_line(line) {
        Some(ConsoleInput::Ask { user }) => {
            let request = StartRequest {
                user: UserRef::new(user.clone(), user),
                channel: ask_channel.clone(),
                trigger: chat.next_message_id(),
            };
            if let Err(e) = flow.start(request).await {
                tracing::info!(error = %e, "Start rejected");
                if let Err(e) = chat
                    .send_message(ask_channel, &OutgoingMessage::text(e.to_string()))
                    .await
                {
                    tracing::warn!(error = %e, "Failed to report start error");
                }
            }
        }
        Some(ConsoleInput::History { user }) => {
            let content = match db.list_questions_by_author(&UserId::new(user.as_str())) {
                Ok(questions) if questions.is_empty() => {
                    format!("{user} has not posted any questions.")
                }
                Ok(questions) => questions
                    .iter()
                    .map(|q| {
                        format!(
                            "{} ({}) in thread {}",
                            q.title,
                            q.created_at.format("%Y-%m-%d"),
                            q.thread_id
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list questions");
                    return;
                }
            };
            if let Err(e) = chat
                .send_message(ask_channel, &OutgoingMessage::text(content))
                .await
            {
                tracing::warn!(error = %e, "Failed to send question history");
            }
        }
        Some(ConsoleInput::Say { user, text }) => {
            let author = UserId::new(user);
            let surface = flow
                .sessions()
                .surface_of(&author)
                .unwrap_or_else(|| ask_channel.clone());
            let message = InboundMessage {
                author,
                surface,
                id: chat.next_message_id(),
                text,
            };
            let matched = flow.handle_message(&message);
            tracing::debug!(matched, "Dispatched message");
        }
        None => {}
    }
}
