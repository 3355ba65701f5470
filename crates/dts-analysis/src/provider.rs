//! Source text providers.
//!
//! The analysis layer never touches the filesystem directly: everything
//! it reads comes through a [`SourceProvider`], which maps a URI to
//! text. Editor embedders back this with their open-document store;
//! tests use [`MemoryProvider`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use url::Url;

/// An error produced while loading a source.
///
/// Unreadable sources are the only fatal errors in the pipeline; every
/// structural problem is reported through diagnostics instead.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The URI does not resolve to a source.
    #[error("source `{0}` was not found")]
    NotFound(Url),

    /// The source exists but could not be read.
    #[error("failed to read source `{uri}`")]
    Io {
        /// The URI of the unreadable source.
        uri: Url,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Maps a URI to source text.
///
/// Loading is asynchronous; it is one of the suspension points of the
/// analysis pipeline.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Loads the text of the given URI.
    async fn load(&self, uri: &Url) -> Result<Arc<str>, SourceError>;
}

/// An in-memory source provider.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    /// The sources by URI.
    sources: RwLock<HashMap<Url, Arc<str>>>,
}

impl MemoryProvider {
    /// Constructs an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the text of the given URI.
    pub fn insert(&self, uri: Url, text: impl Into<Arc<str>>) {
        self.sources.write().insert(uri, text.into());
    }

    /// Removes the text of the given URI.
    pub fn remove(&self, uri: &Url) {
        self.sources.write().remove(uri);
    }
}

#[async_trait]
impl SourceProvider for MemoryProvider {
    async fn load(&self, uri: &Url) -> Result<Arc<str>, SourceError> {
        self.sources
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(uri.clone()))
    }
}
