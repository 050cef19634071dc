//! Google Docs document store
//!
//! Documents are created, read and edited through the Docs v1 API; Docs has
//! no delete call, so removal goes through Drive v3.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GoogleDocsConfig;
use crate::document::{AtomicEdit, DocumentStore, DocumentStoreError, FetchedDocument};
use crate::BackingId;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    document_id: String,
    #[serde(default)]
    revision_id: Option<String>,
    #[serde(default)]
    body: Option<Body>,
}

#[derive(Deserialize)]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Deserialize)]
struct StructuralElement {
    #[serde(default)]
    paragraph: Option<Paragraph>,
}

#[derive(Deserialize)]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    #[serde(default)]
    text_run: Option<TextRun>,
}

#[derive(Deserialize)]
struct TextRun {
    #[serde(default)]
    content: String,
}

impl Document {
    /// Concatenated text of every paragraph; section breaks and other
    /// non-text elements carry no content.
    fn text(&self) -> String {
        self.body
            .iter()
            .flat_map(|body| &body.content)
            .filter_map(|element| element.paragraph.as_ref())
            .flat_map(|paragraph| &paragraph.elements)
            .filter_map(|element| element.text_run.as_ref())
            .map(|run| run.content.as_str())
            .collect()
    }
}

/// Body of a `documents.batchUpdate` call carrying `edit`.
fn batch_update_body(edit: &AtomicEdit) -> Value {
    let mut requests = Vec::new();
    if let Some(range) = &edit.delete {
        requests.push(json!({
            "deleteContentRange": {
                "range": { "startIndex": range.start, "endIndex": range.end }
            }
        }));
    }
    if let Some(insertion) = &edit.insert {
        requests.push(json!({
            "insertText": {
                "location": { "index": insertion.index },
                "text": insertion.text
            }
        }));
    }

    let mut body = json!({ "requests": requests });
    if let Some(revision) = &edit.required_revision {
        body["writeControl"] = json!({ "requiredRevisionId": revision });
    }
    body
}

/// Map an HTTP error status onto the store's error taxonomy.
fn classify_status(id: Option<&BackingId>, code: u16, message: String) -> DocumentStoreError {
    match (code, id) {
        (404, Some(id)) => DocumentStoreError::NotFound(id.clone()),
        (409, Some(id)) => DocumentStoreError::Conflict(id.clone()),
        // A stale requiredRevisionId is reported as a failed precondition
        (400, Some(id)) if message.contains("FAILED_PRECONDITION") => DocumentStoreError::Conflict(id.clone()),
        _ => DocumentStoreError::Status { code, message },
    }
}

fn map_error(id: Option<&BackingId>, err: ureq::Error) -> DocumentStoreError {
    match err {
        ureq::Error::Status(code, response) => {
            let message = response.into_string().unwrap_or_default();
            classify_status(id, code, message)
        }
        ureq::Error::Transport(transport) => DocumentStoreError::Transport(transport.to_string()),
    }
}

/// Document store backed by Google Docs and Google Drive
pub struct GoogleDocsStore {
    agent: ureq::Agent,
    docs_api_base: String,
    drive_api_base: String,
    authorization: String,
}

impl GoogleDocsStore {
    pub fn new(config: &GoogleDocsConfig, access_token: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent("docfs/0.1")
            .build();

        Self {
            agent,
            docs_api_base: config.docs_api_base.trim_end_matches('/').to_string(),
            drive_api_base: config.drive_api_base.trim_end_matches('/').to_string(),
            authorization: format!("Bearer {}", access_token),
        }
    }

    fn document_url(&self, id: &BackingId) -> String {
        format!("{}/v1/documents/{}", self.docs_api_base, id)
    }
}

impl DocumentStore for GoogleDocsStore {
    fn create(&self, title: &str) -> Result<BackingId, DocumentStoreError> {
        let url = format!("{}/v1/documents", self.docs_api_base);
        let document: Document = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization)
            .send_json(json!({ "title": title }))
            .map_err(|e| map_error(None, e))?
            .into_json()
            .map_err(|e| DocumentStoreError::Decode(e.to_string()))?;

        debug!(id = %document.document_id, title, "created google document");
        Ok(BackingId::new(document.document_id))
    }

    fn fetch(&self, id: &BackingId) -> Result<FetchedDocument, DocumentStoreError> {
        let document: Document = self
            .agent
            .get(&self.document_url(id))
            .set("Authorization", &self.authorization)
            .call()
            .map_err(|e| map_error(Some(id), e))?
            .into_json()
            .map_err(|e| DocumentStoreError::Decode(e.to_string()))?;

        Ok(FetchedDocument {
            text: document.text(),
            revision: document.revision_id,
        })
    }

    fn apply_atomic_edit(&self, id: &BackingId, edit: &AtomicEdit) -> Result<(), DocumentStoreError> {
        let url = format!("{}:batchUpdate", self.document_url(id));
        self.agent
            .post(&url)
            .set("Authorization", &self.authorization)
            .send_json(batch_update_body(edit))
            .map_err(|e| map_error(Some(id), e))?;
        Ok(())
    }

    fn delete(&self, id: &BackingId) -> Result<(), DocumentStoreError> {
        let url = format!("{}/drive/v3/files/{}", self.drive_api_base, id);
        self.agent
            .delete(&url)
            .set("Authorization", &self.authorization)
            .call()
            .map_err(|e| map_error(Some(id), e))?;
        Ok(())
    }
}
