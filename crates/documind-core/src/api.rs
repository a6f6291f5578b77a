//! HTTP client for the DocuMind REST API
//!
//! Thin request/response calls under `/api/v1`. None of them retry; every
//! failure is returned as a [`SyncError`] and left to the caller.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    AskRequest, AskResponse, Conversation, ConversationList, Document, DocumentList, HealthStatus,
    UploadResponse,
};

/// Issues the non-streaming ask call that accompanies a socket stream
#[async_trait]
pub trait AskBackend: Send + Sync {
    async fn ask(&self, conversation_id: &str, request: &AskRequest) -> SyncResult<AskResponse>;
}

/// REST client
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(SyncError::transport)?;

        Ok(Self {
            http,
            base: config.api_base().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    /// Create a conversation, optionally titled
    pub async fn create_conversation(&self, title: Option<&str>) -> SyncResult<Conversation> {
        let body = match title {
            Some(title) => json!({ "title": title }),
            None => json!({}),
        };
        let request = self.http.post(self.url("/conversations")).json(&body);
        read_json(send(request).await?).await
    }

    pub async fn list_conversations(&self) -> SyncResult<ConversationList> {
        let request = self.http.get(self.url("/conversations"));
        read_json(send(request).await?).await
    }

    /// Fetch a conversation with its messages
    pub async fn get_conversation(&self, id: &str) -> SyncResult<Conversation> {
        let request = self.http.get(self.url(&format!("/conversations/{}", id)));
        read_json(send(request).await?).await
    }

    pub async fn delete_conversation(&self, id: &str) -> SyncResult<()> {
        let request = self.http.delete(self.url(&format!("/conversations/{}", id)));
        send(request).await?;
        Ok(())
    }

    /// Ask a question and wait for the complete answer
    pub async fn ask(
        &self,
        conversation_id: &str,
        request: &AskRequest,
    ) -> SyncResult<AskResponse> {
        let request = self
            .http
            .post(self.url(&format!("/conversations/{}/ask", conversation_id)))
            .json(request);
        read_json(send(request).await?).await
    }

    pub async fn list_documents(&self, page: u32, page_size: u32) -> SyncResult<DocumentList> {
        let request = self
            .http
            .get(self.url("/documents"))
            .query(&[("page", page), ("page_size", page_size)]);
        let mut list: DocumentList = read_json(send(request).await?).await?;
        list.documents = list.documents.into_iter().map(Document::normalized).collect();
        Ok(list)
    }

    pub async fn get_document(&self, id: &str) -> SyncResult<Document> {
        let request = self.http.get(self.url(&format!("/documents/{}", id)));
        let document: Document = read_json(send(request).await?).await?;
        Ok(document.normalized())
    }

    /// Upload a file for processing
    pub async fn upload_document(&self, path: &Path) -> SyncResult<UploadResponse> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| {
                SyncError::Transport(format!("Failed to read {}: {}", path.display(), e))
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        debug!(file = %file_name, bytes = data.len(), "Uploading document");
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));
        let request = self.http.post(self.url("/documents/upload")).multipart(form);
        read_json(send(request).await?).await
    }

    pub async fn delete_document(&self, id: &str) -> SyncResult<()> {
        let request = self.http.delete(self.url(&format!("/documents/{}", id)));
        send(request).await?;
        Ok(())
    }

    /// Service health
    pub async fn health(&self) -> SyncResult<HealthStatus> {
        let request = self.http.get(self.url("/health"));
        read_json(send(request).await?).await
    }
}

#[async_trait]
impl AskBackend for ApiClient {
    async fn ask(&self, conversation_id: &str, request: &AskRequest) -> SyncResult<AskResponse> {
        ApiClient::ask(self, conversation_id, request).await
    }
}

/// Send a request, turning error statuses into service errors
async fn send(request: RequestBuilder) -> SyncResult<Response> {
    let response = request.send().await.map_err(SyncError::from_reqwest)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Service {
        status: status.as_u16(),
        detail: service_detail(&body),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| SyncError::Transport(format!("Unexpected response body: {}", e)))
}

/// Error detail from a failed response body
///
/// The API reports errors as `{"detail": ...}`; anything else is returned
/// as the raw body text.
pub(crate) fn service_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_detail_string() {
        assert_eq!(
            service_detail(r#"{"detail":"Conversation not found"}"#),
            "Conversation not found"
        );
    }

    #[test]
    fn test_service_detail_structured() {
        let detail =
            service_detail(r#"{"detail":[{"loc":["body","question"],"msg":"field required"}]}"#);
        assert!(detail.contains("field required"));
    }

    #[test]
    fn test_service_detail_plain_body() {
        assert_eq!(service_detail("Internal Server Error\n"), "Internal Server Error");
        assert_eq!(service_detail(r#"{"error":"x"}"#), r#"{"error":"x"}"#);
    }

    #[test]
    fn test_urls() {
        let config = Config {
            api_url: "http://api.local:8000/".to_string(),
            ..Config::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(
            client.url("/conversations/c1/ask"),
            "http://api.local:8000/api/v1/conversations/c1/ask"
        );
    }
}
