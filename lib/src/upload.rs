// Copyright (c) 2019-2023 Crater Dog Technologies

//! Document upload collaborator

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use log::debug;

use crate::{
    document::{Citation, Document},
    Error,
};

/// Cloud storage for notarized documents
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Store a signed document, authorised by signed credentials
    async fn put_document(&self, credentials: &Document, document: &Document) -> Result<(), Error>;

    /// Store a named citation, authorised by signed credentials
    async fn put_citation(
        &self,
        credentials: &Document,
        name: &str,
        version: &str,
        citation: &Citation,
    ) -> Result<(), Error>;
}

#[derive(Default)]
struct Uploads {
    documents: BTreeMap<String, Document>,
    citations: BTreeMap<String, Citation>,
    failures: usize,
}

/// In-memory [Uploader], clones share storage
#[derive(Clone, Default)]
pub struct MemoryUploader {
    inner: Arc<Mutex<Uploads>>,
}

impl MemoryUploader {
    /// Create a new, empty uploader
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` uploads
    pub fn fail_next(&self, n: usize) {
        if let Ok(mut u) = self.inner.lock() {
            u.failures = n;
        }
    }

    /// Fetch an uploaded document by `tag/version`
    pub fn document(&self, tag: &str, version: &str) -> Option<Document> {
        let u = self.inner.lock().ok()?;
        u.documents.get(&format!("{tag}/{version}")).cloned()
    }

    /// Fetch an uploaded citation by `name/version`
    pub fn citation(&self, name: &str, version: &str) -> Option<Citation> {
        let u = self.inner.lock().ok()?;
        u.citations.get(&format!("{name}/{version}")).cloned()
    }

    /// Number of stored documents
    pub fn document_count(&self) -> usize {
        self.inner.lock().map(|u| u.documents.len()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Uploads>, Error> {
        let mut u = self
            .inner
            .lock()
            .map_err(|_| Error::Upload("lock poisoned".to_string()))?;

        if u.failures > 0 {
            u.failures -= 1;
            return Err(Error::Upload("storage unavailable".to_string()));
        }

        Ok(u)
    }
}

#[async_trait]
impl Uploader for MemoryUploader {
    async fn put_document(&self, credentials: &Document, document: &Document) -> Result<(), Error> {
        if !credentials.is_signed() || !document.is_signed() {
            return Err(Error::Upload("unsigned document".to_string()));
        }

        let key = format!("{}/{}", document.tag, document.version);
        debug!("Uploading document {}", key);

        self.lock()?.documents.insert(key, document.clone());

        Ok(())
    }

    async fn put_citation(
        &self,
        credentials: &Document,
        name: &str,
        version: &str,
        citation: &Citation,
    ) -> Result<(), Error> {
        if !credentials.is_signed() {
            return Err(Error::Upload("unsigned credentials".to_string()));
        }

        let key = format!("{name}/{version}");
        debug!("Uploading citation {}", key);

        self.lock()?.citations.insert(key, citation.clone());

        Ok(())
    }
}
