//! In-memory doubles for the external collaborators.
//!
//! Each implements the same trait as its production counterpart, so the
//! stages, handlers and router run their real code paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{Error, ObjectMetadata, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use storage::scratch::suffix_for;
use storage::{ObjectStore, ScratchFile};
use worker::{Mailer, TextGenerator};

type ObjectId = (String, String);

/// Object store holding objects and their user metadata in memory.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    objects: Arc<Mutex<HashMap<ObjectId, Vec<u8>>>>,
    metadata: Arc<Mutex<HashMap<ObjectId, ObjectMetadata>>>,
    downloads: Arc<AtomicUsize>,
    metadata_writes: Arc<AtomicUsize>,
    failing_downloads: Arc<AtomicU32>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    /// Metadata currently attached to an object.
    pub fn metadata_of(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        self.metadata
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn metadata_write_count(&self) -> usize {
        self.metadata_writes.load(Ordering::SeqCst)
    }

    /// Makes the next `n` downloads fail with a transport error.
    pub fn fail_next_downloads(&self, n: u32) {
        self.failing_downloads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<ScratchFile> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_downloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::transport("connection reset by peer"));
        }

        let bytes = self
            .objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{bucket}/{key}")))?;

        ScratchFile::from_bytes(None, &suffix_for(key), &bytes)
    }

    async fn write_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let id = (bucket.to_string(), key.to_string());
        if !self.objects.lock().contains_key(&id) {
            return Err(Error::not_found(format!("{bucket}/{key}")));
        }
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        self.metadata.lock().insert(id, metadata.clone());
        Ok(())
    }

    async fn read_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.metadata_of(bucket, key)
            .ok_or_else(|| Error::not_found(format!("{bucket}/{key}")))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Text generator with a fixed answer, or none.
#[derive(Clone, Default)]
pub struct MockTextGenerator {
    answer: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockTextGenerator {
    pub fn answering(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            prompts: Arc::default(),
        }
    }

    /// Generator whose every call fails.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.answer
            .clone()
            .ok_or_else(|| Error::downstream("text generation returned 429 Too Many Requests"))
    }
}

/// A captured email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub subject: String,
    pub body: String,
}

/// Mailer that records every message it accepts.
#[derive(Clone, Default)]
pub struct MockMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
    failing_sends: Arc<AtomicU32>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    /// Makes the next `n` sends fail as if the relay were down.
    pub fn fail_next_sends(&self, n: u32) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::downstream("SMTP relay refused connection"));
        }

        self.sent.lock().push(SentMail {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_serves_objects_as_scratch_files() {
        let store = MockObjectStore::new();
        store.put("rasters", "dir/a.tif", b"abc".to_vec());

        let scratch = store.download("rasters", "dir/a.tif").await.unwrap();
        assert_eq!(scratch.size(), 3);
        assert!(scratch.path().to_string_lossy().ends_with(".tif"));

        let err = store.download("rasters", "missing.tif").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_mailer_failure_mode() {
        let mailer = MockMailer::new();
        mailer.fail_next_sends(1);

        assert!(mailer.send("Georeport", "first").await.is_err());
        mailer.send("Georeport", "second").await.unwrap();
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(mailer.sent()[0].body, "second");
    }
}
