//! Random-access byte storage on top of whole-document text stores

use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec;
use crate::config::WritePolicy;
use crate::document::{AtomicEdit, DocumentStore, DocumentStoreError, Insertion, TextRange, FIRST_INDEX};
use crate::error::FsResult;
use crate::{BackingId, FsError};

/// Current content of a backing document
struct Snapshot {
    bytes: Vec<u8>,
    editable_len: u64,
    revision: Option<String>,
}

/// Byte-range reads and overwrites against a [`DocumentStore`].
///
/// Every mutation is a full read-modify-write: the current text is fetched
/// and decoded, the bytes are changed locally, and the complete new encoding
/// replaces the old one in a single atomic edit.
pub struct RandomAccessStore {
    documents: Arc<dyn DocumentStore>,
    policy: WritePolicy,
    max_file_size: u64,
}

impl RandomAccessStore {
    pub fn new(documents: Arc<dyn DocumentStore>, policy: WritePolicy, max_file_size: u64) -> Self {
        Self {
            documents,
            policy,
            max_file_size,
        }
    }

    /// Validate that a file may grow to `len` bytes.
    fn check_len(&self, len: Option<u64>) -> FsResult<usize> {
        len.filter(|len| *len <= self.max_file_size)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(FsError::FileTooLarge)
    }

    pub fn create_backing(&self, title: &str) -> FsResult<BackingId> {
        let id = self.documents.create(title)?;
        debug!(%id, title, "created backing document");
        Ok(id)
    }

    pub fn delete_backing(&self, id: &BackingId) -> FsResult<()> {
        self.documents.delete(id)?;
        debug!(%id, "deleted backing document");
        Ok(())
    }

    /// Read up to `length` bytes at `offset`, or everything from `offset`
    /// when `length` is `None`. Returns the slice and the total length.
    pub fn read(&self, id: &BackingId, offset: u64, length: Option<u64>) -> FsResult<(Vec<u8>, u64)> {
        let snapshot = self.load(id)?;
        let total = snapshot.bytes.len() as u64;

        let start = offset.min(total);
        let end = match length {
            Some(length) => offset.saturating_add(length).min(total),
            None => total,
        };
        let slice = snapshot.bytes[start as usize..end.max(start) as usize].to_vec();
        Ok((slice, total))
    }

    /// Overwrite `[offset, offset + data.len())`, zero-filling any gap past
    /// the current end. Returns the new total length.
    pub fn write(&self, id: &BackingId, offset: u64, data: &[u8]) -> FsResult<u64> {
        let end = self.check_len(offset.checked_add(data.len() as u64))?;
        let start = end - data.len();
        self.read_modify_write(id, |bytes| {
            if end > bytes.len() {
                bytes.resize(end, 0);
            }
            bytes[start..end].copy_from_slice(data);
        })
    }

    /// Cut or zero-extend the content to exactly `new_len` bytes.
    pub fn truncate(&self, id: &BackingId, new_len: u64) -> FsResult<()> {
        let new_len = self.check_len(Some(new_len))?;
        self.read_modify_write(id, |bytes| bytes.resize(new_len, 0))?;
        Ok(())
    }

    fn load(&self, id: &BackingId) -> FsResult<Snapshot> {
        let fetched = self.documents.fetch(id)?;
        let bytes = codec::decode(&fetched.text)?;
        Ok(Snapshot {
            bytes,
            editable_len: fetched.editable_len(),
            revision: fetched.revision,
        })
    }

    fn read_modify_write(&self, id: &BackingId, modify: impl Fn(&mut Vec<u8>)) -> FsResult<u64> {
        let mut attempt = 0;
        loop {
            let snapshot = self.load(id)?;
            let mut bytes = snapshot.bytes.clone();
            modify(&mut bytes);

            match self.replace(id, &snapshot, &bytes) {
                Ok(()) => return Ok(bytes.len() as u64),
                Err(DocumentStoreError::Conflict(_)) if attempt < self.policy.max_conflict_retries => {
                    attempt += 1;
                    warn!(%id, attempt, "document changed underneath write, retrying");
                }
                Err(e) => return Err(FsError::Backend(e)),
            }
        }
    }

    /// Swap the whole editable body for the encoding of `bytes`.
    fn replace(&self, id: &BackingId, current: &Snapshot, bytes: &[u8]) -> Result<(), DocumentStoreError> {
        let text = codec::encode(bytes);

        let edit = AtomicEdit {
            delete: (current.editable_len > 0).then(|| TextRange {
                start: FIRST_INDEX,
                end: FIRST_INDEX + current.editable_len,
            }),
            insert: (!text.is_empty()).then(|| Insertion {
                index: FIRST_INDEX,
                text,
            }),
            required_revision: if self.policy.require_revision {
                current.revision.clone()
            } else {
                None
            },
        };
        if edit.is_empty() {
            return Ok(());
        }
        self.documents.apply_atomic_edit(id, &edit)
    }
}
