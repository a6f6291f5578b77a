//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::io::{self, Write};

use serde::Serialize;

use documind_core::models::{
    Conversation, ConversationList, Document, DocumentList, HealthStatus, Message, Role,
    UploadResponse,
};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Whether progress may be drawn while streaming
    pub fn is_live(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print a conversation with its messages
    pub fn print_conversation(&self, conversation: &Conversation) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", conversation.id);
                println!("Title:    {}", conversation.display_title());
                println!(
                    "Created:  {}",
                    conversation.created_at.format("%Y-%m-%d %H:%M")
                );
                println!(
                    "Updated:  {}",
                    conversation.updated_at.format("%Y-%m-%d %H:%M")
                );

                if !conversation.messages.is_empty() {
                    println!();
                    println!("── Messages ({}) ──", conversation.messages.len());
                    for message in &conversation.messages {
                        self.print_message_body(message);
                    }
                }
            }
            OutputFormat::Json => print_json(conversation),
            OutputFormat::Quiet => println!("{}", conversation.id),
        }
    }

    /// Print a list of conversations
    pub fn print_conversations(&self, list: &ConversationList) {
        match self.format {
            OutputFormat::Human => {
                if list.conversations.is_empty() {
                    println!("No conversations found.");
                    return;
                }
                for conversation in &list.conversations {
                    println!(
                        "{} | {} | {}",
                        short_id(&conversation.id),
                        truncate(conversation.display_title(), 50),
                        conversation.updated_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} conversation(s)", list.total);
            }
            OutputFormat::Json => print_json(list),
            OutputFormat::Quiet => {
                for conversation in &list.conversations {
                    println!("{}", conversation.id);
                }
            }
        }
    }

    /// Print a finished answer
    ///
    /// In human mode the text was already streamed, so only the sources and
    /// usage are added.
    pub fn print_answer(&self, message: &Message) {
        match self.format {
            OutputFormat::Human => {
                println!();
                if !message.sources.is_empty() {
                    println!();
                    println!("── Sources ({}) ──", message.sources.len());
                    for source in &message.sources {
                        let page = source
                            .page_number
                            .map(|p| format!(", p. {}", p))
                            .unwrap_or_default();
                        println!(
                            "[{:.2}] {}{}",
                            source.relevance_score, source.document_name, page
                        );
                    }
                }
                if let (Some(model), Some(tokens)) = (&message.model_used, message.tokens_used) {
                    println!();
                    println!("{} · {} tokens", model, tokens.total);
                }
            }
            OutputFormat::Json => print_json(message),
            OutputFormat::Quiet => println!("{}", message.content),
        }
    }

    /// Print a single document
    pub fn print_document(&self, document: &Document) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", document.id);
                println!("Name:     {}", document.name.as_deref().unwrap_or("(unnamed)"));
                println!("Status:   {}", document.status);
                println!("Progress: {}%", document.progress);
                if !document.current_step.is_empty() {
                    println!("Step:     {}", document.current_step);
                }
                println!("Chunks:   {}", document.chunk_count);
                if let Some(ref error) = document.error_message {
                    println!("Error:    {}", error);
                }
                if let Some(error) = document.sync_error() {
                    println!("Stream:   {}", error);
                }
            }
            OutputFormat::Json => print_json(document),
            OutputFormat::Quiet => println!("{}", document.status),
        }
    }

    /// Print a page of documents
    pub fn print_documents(&self, list: &DocumentList) {
        match self.format {
            OutputFormat::Human => {
                if list.documents.is_empty() {
                    println!("No documents found.");
                    return;
                }
                for document in &list.documents {
                    println!(
                        "{} | {} | {:>10} | {:>3}%",
                        short_id(&document.id),
                        truncate(document.name.as_deref().unwrap_or("(unnamed)"), 40),
                        document.status,
                        document.progress
                    );
                }
                println!(
                    "\nPage {} · {} of {} document(s)",
                    list.page,
                    list.documents.len(),
                    list.total
                );
            }
            OutputFormat::Json => print_json(list),
            OutputFormat::Quiet => {
                for document in &list.documents {
                    println!("{}", document.id);
                }
            }
        }
    }

    pub fn print_upload(&self, upload: &UploadResponse) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Uploaded {} ({})", upload.name, upload.id);
                if !upload.message.is_empty() {
                    println!("  {}", upload.message);
                }
            }
            OutputFormat::Json => print_json(upload),
            OutputFormat::Quiet => println!("{}", upload.id),
        }
    }

    /// Redraw the progress line of a document being processed
    pub fn print_progress(&self, document: &Document) {
        if !self.is_live() {
            return;
        }
        let step = if document.current_step.is_empty() {
            document.status.to_string()
        } else {
            document.current_step.clone()
        };
        print!("\r{:>3}% {:<40}", document.progress, truncate(&step, 40));
        io::stdout().flush().ok();
    }

    /// Print newly streamed answer text
    pub fn print_delta(&self, text: &str) {
        if !self.is_live() {
            return;
        }
        print!("{}", text);
        io::stdout().flush().ok();
    }

    pub fn print_health(&self, health: &HealthStatus) {
        match self.format {
            OutputFormat::Human => {
                println!("Status:   {}", health.status);
                if !health.version.is_empty() {
                    println!("Version:  {}", health.version);
                }
                let mut services: Vec<_> = health.services.iter().collect();
                services.sort();
                for (name, up) in services {
                    println!("  {:<12} {}", name, if *up { "up" } else { "down" });
                }
            }
            OutputFormat::Json => print_json(health),
            OutputFormat::Quiet => println!("{}", health.status),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    fn print_message_body(&self, message: &Message) {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "DocuMind",
        };
        println!();
        println!("[{}] {}:", message.created_at.format("%H:%M"), speaker);
        println!("{}", message.content);
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode JSON output: {}", e),
    }
}

/// First eight characters of an id
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("3f2a9c1e-77aa-4d21"), "3f2a9c1e");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_only_human_output_is_live() {
        assert!(Output::new(OutputFormat::Human).is_live());
        assert!(!Output::new(OutputFormat::Json).is_live());
        assert!(!Output::new(OutputFormat::Quiet).is_live());
    }
}
