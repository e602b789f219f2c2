//! Open document storage

use std::collections::HashMap;
use tokio::sync::RwLock;
use tower_lsp::lsp_types::Url;

/// Text of one open document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub uri: Url,
    pub text: String,
    pub version: i32,
}

/// Current text of every open document, keyed by URI
///
/// Documents are replaced wholesale, so a reader always sees a text and
/// version that arrived together.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: RwLock<HashMap<Url, Document>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, uri: Url, text: String, version: i32) {
        let document = Document {
            uri: uri.clone(),
            text,
            version,
        };
        self.documents.write().await.insert(uri, document);
    }

    pub async fn get(&self, uri: &Url) -> Option<Document> {
        self.documents.read().await.get(uri).cloned()
    }

    pub async fn delete(&self, uri: &Url) -> Option<Document> {
        self.documents.write().await.remove(uri)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}
