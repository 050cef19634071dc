//! Remote document store abstraction
//!
//! A document store only knows two content primitives: fetch the whole
//! text, and apply one atomic batched edit (a range deletion plus an
//! insertion). Positions are 1-based and counted in UTF-16 code units, and
//! every document ends with a terminal newline that is not editable.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::BackingId;

/// First valid insertion index of a document body.
pub const FIRST_INDEX: u64 = 1;

/// Half-open range `[start, end)` of backend positions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Insertion {
    pub index: u64,
    pub text: String,
}

/// One indivisible backend edit. The deletion applies before the insertion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomicEdit {
    pub delete: Option<TextRange>,
    pub insert: Option<Insertion>,
    /// Reject the edit unless the document is still at this revision
    pub required_revision: Option<String>,
}

impl AtomicEdit {
    pub fn is_empty(&self) -> bool {
        self.delete.is_none() && self.insert.is_none()
    }
}

/// Full text of a document as returned by the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedDocument {
    pub text: String,
    pub revision: Option<String>,
}

impl FetchedDocument {
    /// Length in backend positions of the editable body, i.e. the text
    /// without its terminal newline.
    pub fn editable_len(&self) -> u64 {
        let body = self.text.strip_suffix('\n').unwrap_or(&self.text);
        body.encode_utf16().count() as u64
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DocumentStoreError {
    #[error("document {0} not found")]
    NotFound(BackingId),
    #[error("document {0} was modified concurrently")]
    Conflict(BackingId),
    #[error("edit rejected: {0}")]
    InvalidEdit(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend returned status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

/// Storage backend trait for remote text documents
pub trait DocumentStore: Send + Sync {
    fn create(&self, title: &str) -> Result<BackingId, DocumentStoreError>;
    fn fetch(&self, id: &BackingId) -> Result<FetchedDocument, DocumentStoreError>;
    fn apply_atomic_edit(&self, id: &BackingId, edit: &AtomicEdit) -> Result<(), DocumentStoreError>;
    fn delete(&self, id: &BackingId) -> Result<(), DocumentStoreError>;
}

struct MemoryDocument {
    title: String,
    /// UTF-16 code units, matching how the Docs API counts positions
    body: Vec<u16>,
    revision: u64,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    documents: HashMap<BackingId, MemoryDocument>,
    edit_log: Vec<(BackingId, AtomicEdit)>,
    /// Fetches after which a concurrent editor touches the document
    pending_interference: u32,
}

/// In-memory document store with the same edit semantics as the remote one
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, id: &BackingId) -> bool {
        self.lock().documents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn title(&self, id: &BackingId) -> Option<String> {
        self.lock().documents.get(id).map(|doc| doc.title.clone())
    }

    /// Editable body of a document, without the terminal newline.
    pub fn body(&self, id: &BackingId) -> Option<String> {
        self.lock().documents.get(id).map(|doc| String::from_utf16_lossy(&doc.body))
    }

    /// Overwrite a body as an outside editor would.
    pub fn set_body(&self, id: &BackingId, text: &str) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| DocumentStoreError::NotFound(id.clone()))?;
        doc.body = text.encode_utf16().collect();
        doc.revision += 1;
        Ok(())
    }

    /// Make the next `count` fetches race with another editor, so an edit
    /// conditioned on the fetched revision conflicts.
    pub fn interfere_after_fetches(&self, count: u32) {
        self.lock().pending_interference = count;
    }

    /// Every edit applied so far, in order.
    pub fn edit_log(&self) -> Vec<(BackingId, AtomicEdit)> {
        self.lock().edit_log.clone()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_edit(body_len: u64, edit: &AtomicEdit) -> Result<(), DocumentStoreError> {
    // The terminal newline sits at body_len + 1 and may not be deleted.
    let mut len_after_delete = body_len;
    if let Some(range) = &edit.delete {
        if range.start < FIRST_INDEX || range.end <= range.start || range.end > body_len + 1 {
            return Err(DocumentStoreError::InvalidEdit(format!(
                "delete range {}..{} outside body of length {}",
                range.start, range.end, body_len
            )));
        }
        len_after_delete -= range.end - range.start;
    }
    if let Some(insertion) = &edit.insert {
        if insertion.index < FIRST_INDEX || insertion.index > len_after_delete + 1 {
            return Err(DocumentStoreError::InvalidEdit(format!(
                "insertion index {} outside body of length {}",
                insertion.index, len_after_delete
            )));
        }
    }
    Ok(())
}

impl DocumentStore for MemoryDocumentStore {
    fn create(&self, title: &str) -> Result<BackingId, DocumentStoreError> {
        let mut state = self.lock();
        let id = BackingId::new(format!("mem-{}", state.next_id));
        state.next_id += 1;
        state.documents.insert(
            id.clone(),
            MemoryDocument {
                title: title.to_string(),
                body: Vec::new(),
                revision: 1,
            },
        );
        Ok(id)
    }

    fn fetch(&self, id: &BackingId) -> Result<FetchedDocument, DocumentStoreError> {
        let mut state = self.lock();
        let interfere = state.pending_interference > 0;
        if interfere {
            state.pending_interference -= 1;
        }
        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| DocumentStoreError::NotFound(id.clone()))?;

        let mut text = String::from_utf16_lossy(&doc.body);
        text.push('\n');
        let revision = Some(doc.revision.to_string());
        if interfere {
            doc.revision += 1;
        }
        Ok(FetchedDocument { text, revision })
    }

    fn apply_atomic_edit(&self, id: &BackingId, edit: &AtomicEdit) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        let doc = state
            .documents
            .get_mut(id)
            .ok_or_else(|| DocumentStoreError::NotFound(id.clone()))?;

        if let Some(required) = &edit.required_revision {
            if *required != doc.revision.to_string() {
                return Err(DocumentStoreError::Conflict(id.clone()));
            }
        }
        check_edit(doc.body.len() as u64, edit)?;

        if let Some(range) = &edit.delete {
            let start = (range.start - FIRST_INDEX) as usize;
            let end = (range.end - FIRST_INDEX) as usize;
            doc.body.drain(start..end);
        }
        if let Some(insertion) = &edit.insert {
            let at = (insertion.index - FIRST_INDEX) as usize;
            doc.body.splice(at..at, insertion.text.encode_utf16());
        }
        doc.revision += 1;

        state.edit_log.push((id.clone(), edit.clone()));
        Ok(())
    }

    fn delete(&self, id: &BackingId) -> Result<(), DocumentStoreError> {
        self.lock()
            .documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DocumentStoreError::NotFound(id.clone()))
    }
}
