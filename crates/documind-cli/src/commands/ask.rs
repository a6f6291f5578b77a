//! Ask command handler
//!
//! Streams the answer by watching the conversation while the session
//! applies incoming chunks.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::debug;

use documind_core::models::Conversation;
use documind_core::{ApiClient, Config, SyncSession};

use crate::output::Output;

/// Ask a question in a conversation
pub async fn ask(
    config: &Config,
    conversation_id: String,
    question: String,
    output: &Output,
) -> Result<()> {
    let api = Arc::new(ApiClient::new(config)?);
    let session = SyncSession::with_api(config, Arc::clone(&api))?;

    let conversation = api
        .get_conversation(&conversation_id)
        .await
        .with_context(|| format!("Failed to load conversation {}", conversation_id))?;
    let mut view = session.track_conversation(conversation);
    debug!(
        "Asking in conversation {} over {}",
        conversation_id, config.chat_transport
    );

    let mut streamed = String::new();
    let asking = session.ask(&conversation_id, &question);
    tokio::pin!(asking);

    let result = loop {
        tokio::select! {
            result = &mut asking => break result,
            changed = view.changed() => {
                if changed.is_err() {
                    break (&mut asking).await;
                }
                print_new_text(&mut view, &mut streamed, output);
            }
        }
    };

    match result {
        Ok(message) => {
            let rest = unprinted(&streamed, &message.content);
            if !rest.is_empty() {
                output.print_delta(&rest);
            }
            output.print_answer(&message);
            Ok(())
        }
        Err(e) => {
            if !streamed.is_empty() {
                output.print_delta("\n");
            }
            if let Some(hint) = e.recovery_suggestion() {
                if !output.is_quiet() {
                    eprintln!("Hint: {}", hint);
                }
            }
            Err(e).context("Failed to get an answer")
        }
    }
}

/// Print whatever the in-flight answer gained since the last call
fn print_new_text(view: &mut watch::Receiver<Conversation>, streamed: &mut String, output: &Output) {
    let conversation = view.borrow_and_update();
    let Some(message) = conversation.in_flight_message() else {
        return;
    };

    match message.content.strip_prefix(streamed.as_str()) {
        Some(delta) if !delta.is_empty() => {
            output.print_delta(delta);
            streamed.push_str(delta);
        }
        _ => {}
    }
}

/// Text still to print once the final answer is known
///
/// An answer that does not extend the streamed text is printed in full
/// after a blank line.
fn unprinted(streamed: &str, answer: &str) -> String {
    match answer.strip_prefix(streamed) {
        Some(rest) => rest.to_string(),
        None => format!("\n\n{}", answer),
    }
}
