//! An in-memory [`DocumentTextSource`] (spec §4.4 step 1 "Read text").
//!
//! Byte-level PDF extraction and file-upload transport are explicitly out
//! of core scope (spec §1), so the constructor is tested and driven
//! against a simple map from [`DocumentId`] to already-extracted text.
//! Production deployments populate this map (or a store-backed
//! equivalent) from a real upload/extraction pipeline against the same
//! [`DocumentTextSource`] trait.

use dashmap::DashMap;

use kg_core::error::{CoreError, Result};
use kg_core::traits::DocumentTextSource;
use kg_core::types::DocumentId;

/// `DashMap`-backed text source, mirroring the read-cache shape
/// `kg-store::relational::RocksRelationalStore` uses for its own caches.
#[derive(Default)]
pub struct InMemoryTextSource {
    texts: DashMap<DocumentId, String>,
}

impl InMemoryTextSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the extracted text for `document_id`.
    pub fn insert(&self, document_id: DocumentId, text: impl Into<String>) {
        self.texts.insert(document_id, text.into());
    }
}

#[async_trait::async_trait]
impl DocumentTextSource for InMemoryTextSource {
    async fn document_text(&self, document_id: DocumentId) -> Result<String> {
        self.texts
            .get(&document_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::DocumentUnreadableError(format!("no text registered for document {document_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_registered_text() {
        let source = InMemoryTextSource::new();
        let document_id = kg_core::types::new_id();
        source.insert(document_id, "Alice works at Acme.");
        assert_eq!(source.document_text(document_id).await.unwrap(), "Alice works at Acme.");
    }

    #[tokio::test]
    async fn missing_document_is_unreadable() {
        let source = InMemoryTextSource::new();
        let err = source.document_text(kg_core::types::new_id()).await.unwrap_err();
        assert!(matches!(err, CoreError::DocumentUnreadableError(_)));
    }
}
