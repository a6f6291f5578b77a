//! Document command handlers

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use documind_core::models::{Document, DocumentStatus};
use documind_core::{ApiClient, Config, SyncSession};

use crate::output::Output;

/// List documents
pub async fn list(config: &Config, page: u32, page_size: u32, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    let documents = api
        .list_documents(page, page_size)
        .await
        .context("Failed to list documents")?;

    output.print_documents(&documents);
    Ok(())
}

/// Show document details
pub async fn show(config: &Config, id: String, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    let document = api
        .get_document(&id)
        .await
        .with_context(|| format!("Failed to load document {}", id))?;

    output.print_document(&document);
    Ok(())
}

/// Upload a document, optionally following its processing
pub async fn upload(config: &Config, path: PathBuf, watch: bool, output: &Output) -> Result<()> {
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }

    let api = Arc::new(ApiClient::new(config)?);
    let upload = api
        .upload_document(&path)
        .await
        .with_context(|| format!("Failed to upload {}", path.display()))?;

    output.print_upload(&upload);

    if watch {
        let mut document = Document::new(upload.id);
        document.name = Some(upload.name);
        document.status = upload.status;
        follow(config, api, document, output).await?;
    }

    Ok(())
}

/// Delete a document
pub async fn delete(config: &Config, id: String, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    api.delete_document(&id)
        .await
        .with_context(|| format!("Failed to delete document {}", id))?;

    output.success(&format!("Deleted document {}", id));
    Ok(())
}

/// Follow processing of an existing document
pub async fn watch(config: &Config, id: String, output: &Output) -> Result<()> {
    let api = Arc::new(ApiClient::new(config)?);
    let document = api
        .get_document(&id)
        .await
        .with_context(|| format!("Failed to load document {}", id))?;

    follow(config, api, document, output).await
}

/// Stream status updates until the document is processed
async fn follow(
    config: &Config,
    api: Arc<ApiClient>,
    document: Document,
    output: &Output,
) -> Result<()> {
    let id = document.id.clone();
    let session = SyncSession::with_api(config, Arc::clone(&api))?;
    session.track_document(document);

    let subscription = session.watch_document(&id)?;
    debug!("Following document {} on {}", id, subscription.channel_id());
    let mut view = subscription.document();
    output.print_progress(&view.borrow_and_update());

    let finished = subscription.finished();
    tokio::pin!(finished);

    let document = loop {
        tokio::select! {
            result = &mut finished => break result?,
            changed = view.changed() => {
                if changed.is_err() {
                    break (&mut finished).await?;
                }
                output.print_progress(&view.borrow_and_update());
            }
        }
    };

    if output.is_live() {
        println!();
    }

    if let Some(error) = document.sync_error() {
        bail!("Lost the processing status stream for {}: {}", id, error);
    }

    let status = document.status;
    match status {
        DocumentStatus::Completed => {
            // Chunk counts are not part of status updates
            let document = api.get_document(&id).await.unwrap_or(document);
            output.print_document(&document);
            Ok(())
        }
        DocumentStatus::Failed => bail!(
            "Processing failed: {}",
            document.error_message.as_deref().unwrap_or("unknown error")
        ),
        _ => {
            output.message("Stopped watching before processing finished.");
            Ok(())
        }
    }
}
