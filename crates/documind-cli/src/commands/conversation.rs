//! Conversation command handlers

use anyhow::{Context, Result};

use documind_core::{ApiClient, Config};

use crate::output::Output;

/// Create a conversation
pub async fn create(config: &Config, title: Option<String>, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    let conversation = api
        .create_conversation(title.as_deref())
        .await
        .context("Failed to create conversation")?;

    output.print_conversation(&conversation);
    Ok(())
}

/// List conversations
pub async fn list(config: &Config, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    let conversations = api
        .list_conversations()
        .await
        .context("Failed to list conversations")?;

    output.print_conversations(&conversations);
    Ok(())
}

/// Show a conversation with its messages
pub async fn show(config: &Config, id: String, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    let conversation = api
        .get_conversation(&id)
        .await
        .with_context(|| format!("Failed to load conversation {}", id))?;

    output.print_conversation(&conversation);
    Ok(())
}

/// Delete a conversation
pub async fn delete(config: &Config, id: String, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    api.delete_conversation(&id)
        .await
        .with_context(|| format!("Failed to delete conversation {}", id))?;

    output.success(&format!("Deleted conversation {}", id));
    Ok(())
}
