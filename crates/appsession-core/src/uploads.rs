//! Uploaded-file storage keyed by session.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::session::SessionId;

/// Storage for files uploaded by a session's client.
pub trait UploadedFileStore: Send + Sync {
    /// Drops every file owned by `session_id`. Unknown sessions are a no-op.
    fn remove_session_files(&self, session_id: &SessionId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: u64,
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// In-memory store used by the binary and by tests.
#[derive(Debug, Default)]
pub struct MemoryUploadedFileStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    files: HashMap<SessionId, Vec<UploadedFile>>,
}

impl MemoryUploadedFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a file for `session_id` and returns its id.
    pub fn add_file(
        &self,
        session_id: &SessionId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> u64 {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .files
            .entry(session_id.clone())
            .or_default()
            .push(UploadedFile {
                id,
                name: name.into(),
                mime_type: mime_type.into(),
                data,
            });
        id
    }

    pub fn files_for(&self, session_id: &SessionId) -> Vec<UploadedFile> {
        self.lock()
            .files
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Removes a single file, returning whether it existed.
    pub fn remove_file(&self, session_id: &SessionId, file_id: u64) -> bool {
        let mut inner = self.lock();
        let Some(files) = inner.files.get_mut(session_id) else {
            return false;
        };
        let before = files.len();
        files.retain(|file| file.id != file_id);
        before != files.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UploadedFileStore for MemoryUploadedFileStore {
    fn remove_session_files(&self, session_id: &SessionId) {
        self.lock().files.remove(session_id);
    }
}
