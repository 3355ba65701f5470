//! The tokenized-document cache.
//!
//! Parsing the same text twice is pure waste in a language service, so
//! tokenization and parsing are memoized process-wide, keyed by URI and
//! content hash. The cache is an explicit service object handed to the
//! analyzer rather than an ambient singleton, which keeps tests
//! isolated via [`DocumentCache::reset`].

use std::collections::HashMap;
use std::sync::Arc;

use dts_grammar::Parse;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

/// Preprocessor macro values handed through to the parser.
pub type MacroDefinitions = HashMap<String, u64>;

/// A cached tokenize+parse result for one document.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The content hash the entry was computed from.
    hash: blake3::Hash,
    /// The parse result.
    parse: Arc<Parse>,
}

/// A process-wide cache of tokenized and parsed documents.
///
/// Writers compute outside the lock and publish under it; readers
/// clone an `Arc` snapshot. Entries are invalidated whenever the
/// content hash of their URI changes.
#[derive(Debug, Default)]
pub struct DocumentCache {
    /// The cache entries by URI.
    entries: Mutex<HashMap<Url, CacheEntry>>,
}

impl DocumentCache {
    /// Constructs an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the cached parse of the given URI, if any.
    pub fn get(&self, uri: &Url) -> Option<Arc<Parse>> {
        self.entries.lock().get(uri).map(|e| e.parse.clone())
    }

    /// Gets the parse of the given text, tokenizing and parsing only if
    /// the content hash changed since the last call for this URI.
    ///
    /// The macro definitions must be stable for the lifetime of the
    /// cache; they are not part of the cache key.
    pub fn get_or_parse(&self, uri: &Url, text: &str, macros: &MacroDefinitions) -> Arc<Parse> {
        let hash = blake3::hash(text.as_bytes());
        if let Some(entry) = self.entries.lock().get(uri) {
            if entry.hash == hash {
                return entry.parse.clone();
            }
        }

        // Parse outside the lock; last writer wins for racing updates
        // of the same URI.
        debug!(%uri, "tokenizing and parsing document");
        let parse = Arc::new(dts_grammar::parse_with_macros(text, macros));
        self.entries.lock().insert(
            uri.clone(),
            CacheEntry {
                hash,
                parse: parse.clone(),
            },
        );
        parse
    }

    /// Gets the number of cached documents.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Determines whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clears all entries.
    ///
    /// Only safe between top-level operations; used by test harnesses.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn uri(s: &str) -> Url {
        Url::parse(s).expect("test uri should parse")
    }

    #[test]
    fn reparses_only_on_content_change() {
        let cache = DocumentCache::new();
        let uri = uri("memory:///board.dts");
        let macros = MacroDefinitions::new();

        let first = cache.get_or_parse(&uri, "/ {};", &macros);
        let second = cache.get_or_parse(&uri, "/ {};", &macros);
        assert!(Arc::ptr_eq(&first, &second));

        let third = cache.get_or_parse(&uri, "/ { status = \"okay\"; };", &macros);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reset_clears_entries() {
        let cache = DocumentCache::new();
        let uri = uri("memory:///board.dts");
        cache.get_or_parse(&uri, "/ {};", &MacroDefinitions::new());
        assert_eq!(cache.len(), 1);

        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.get(&uri).is_none());
    }
}
